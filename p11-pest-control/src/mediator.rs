//! Per-site authority lifecycle and policy reconciliation.
//!
//! One `Mediator` is shared (behind a `tokio::sync::Mutex`) across every
//! client connection. A site visit blocks the mutex for the duration of
//! any dial/reconcile it triggers, which is what keeps concurrent visits
//! to a not-yet-dialed site correctly queued and gives policy creation
//! and its `PolicyResult` strict FIFO ordering for free.
use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use tracing::debug;

use crate::codec::packets::create_policy::Action;
use crate::codec::packets::{self, create_policy, delete_policy, dial_authority, hello, PacketCodec};
use crate::codec::Error;

type AuthorityConn = Framed<TcpStream, PacketCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    min: u32,
    max: u32,
}

struct Policy {
    id: u32,
    action: Action,
}

#[derive(Default)]
struct Site {
    authority: Option<AuthorityConn>,
    targets: HashMap<String, Target>,
    policies: HashMap<String, Policy>,
}

pub struct Mediator {
    authority_host: String,
    authority_port: u16,
    sites: HashMap<u32, Site>,
}

impl Mediator {
    #[must_use]
    pub fn new(authority_host: impl Into<String>, authority_port: u16) -> Self {
        Self { authority_host: authority_host.into(), authority_port, sites: HashMap::new() }
    }

    /// Reconciles one site visit: dials (or reuses) the site's authority
    /// connection, then issues whatever `CreatePolicy`/`DeletePolicy`
    /// messages are needed to match the site's target populations.
    pub async fn visit(&mut self, site: u32, populations: &HashMap<String, u32>) -> Result<(), Error> {
        self.ensure_authority(site).await?;

        let site_state = self.sites.get(&site).expect("dialed above");
        let needed: Vec<(String, Option<Action>)> = site_state
            .targets
            .iter()
            .map(|(species, target)| {
                let count = populations.get(species).copied().unwrap_or(0);
                let action = if count < target.min {
                    Some(Action::Conserve)
                } else if count > target.max {
                    Some(Action::Cull)
                } else {
                    None
                };
                (species.clone(), action)
            })
            .collect();

        for (species, action) in needed {
            self.reconcile(site, &species, action).await?;
        }

        Ok(())
    }

    async fn ensure_authority(&mut self, site: u32) -> Result<(), Error> {
        if self.sites.get(&site).is_some_and(|s| s.authority.is_some()) {
            return Ok(());
        }

        let stream = TcpStream::connect((self.authority_host.as_str(), self.authority_port))
            .await
            .map_err(|err| Error::AuthorityDial(err.to_string()))?;
        let mut conn = Framed::new(stream, PacketCodec::new());

        conn.send(hello::Packet::new(hello::PROTOCOL, hello::VERSION).into()).await?;
        conn.send(dial_authority::Packet::new(site).into()).await?;

        match conn.next().await {
            Some(Ok(packets::Packet::Hello(packet))) if packet.is_valid() => {}
            Some(Ok(packets::Packet::Hello(_))) => return Err(Error::BadHello),
            Some(Ok(_)) => return Err(Error::MissingHello),
            Some(Err(err)) => return Err(err),
            None => return Err(Error::AuthorityDial("connection closed before hello".to_string())),
        }

        let targets = match conn.next().await {
            Some(Ok(packets::Packet::TargetPopulations(packet))) => {
                if packet.site != site {
                    return Err(Error::SiteMismatch);
                }
                let mut targets = HashMap::new();
                for target in packet.targets {
                    let entry = Target { min: target.min, max: target.max };
                    if let Some(existing) = targets.insert(target.species.clone(), entry) {
                        if existing != entry {
                            return Err(Error::ConflictingTarget(target.species));
                        }
                    }
                }
                targets
            }
            Some(Ok(other)) => return Err(Error::UnexpectedType(other.type_byte())),
            Some(Err(err)) => return Err(err),
            None => {
                return Err(Error::AuthorityDial("connection closed before target populations".to_string()))
            }
        };

        debug!(site, targets = targets.len(), "dialed authority");

        let site_state = self.sites.entry(site).or_default();
        site_state.authority = Some(conn);
        site_state.targets = targets;
        site_state.policies.clear();

        Ok(())
    }

    async fn reconcile(&mut self, site: u32, species: &str, need: Option<Action>) -> Result<(), Error> {
        let current = self.sites.get(&site).and_then(|s| s.policies.get(species)).map(|p| p.action);
        if current == need {
            return Ok(());
        }

        let site_state = self.sites.get_mut(&site).expect("dialed above");

        if let Some(policy) = site_state.policies.remove(species) {
            let conn = site_state.authority.as_mut().expect("dialed above");
            if let Err(err) = conn.send(delete_policy::Packet::new(policy.id).into()).await {
                site_state.authority = None;
                return Err(err);
            }
        }

        let Some(action) = need else {
            return Ok(());
        };

        let conn = site_state.authority.as_mut().expect("dialed above");
        if let Err(err) = conn.send(create_policy::Packet::new(species, action).into()).await {
            site_state.authority = None;
            return Err(err);
        }

        let id = match conn.next().await {
            Some(Ok(packets::Packet::PolicyResult(packet))) => packet.policy,
            Some(Ok(other)) => {
                let err = Error::UnexpectedType(other.type_byte());
                site_state.authority = None;
                return Err(err);
            }
            Some(Err(err)) => {
                site_state.authority = None;
                return Err(err);
            }
            None => {
                site_state.authority = None;
                return Err(Error::AuthorityDial("connection closed awaiting policy result".to_string()));
            }
        };

        site_state.policies.insert(species.to_string(), Policy { id, action });

        Ok(())
    }
}

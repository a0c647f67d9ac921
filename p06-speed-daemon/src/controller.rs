//! Ticketing logic: observations in, tickets out.
//!
//! Owned exclusively by the server's event loop task (see `run` in
//! `lib.rs`), so it needs no internal synchronization even though the
//! values it's built from arrive from many connections.
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct Plate {
    pub plate: String,
    pub road: u16,
    pub limit: u16,
    pub mile: u16,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub plate: String,
    pub road: u16,
    pub mile1: u16,
    pub timestamp1: u32,
    pub mile2: u16,
    pub timestamp2: u32,
    pub speed: u16,
}

#[derive(Default)]
struct Road {
    limit: u16,
    observations: HashMap<String, Vec<(u32, u16)>>,
}

#[derive(Default)]
pub struct Controller {
    roads: HashMap<u16, Road>,
    ticketed_days: HashMap<String, BTreeSet<i64>>,
}

impl Controller {
    /// Record an observation and return any tickets it triggers.
    ///
    /// Only the pair of observations adjacent to the new one (by
    /// timestamp) can possibly be affected, so only those are checked.
    pub fn signal(&mut self, plate: Plate) -> Vec<Ticket> {
        let road = self.roads.entry(plate.road).or_default();
        road.limit = plate.limit;

        let observations = road.observations.entry(plate.plate.clone()).or_default();
        let idx = observations.partition_point(|&(t, _)| t <= plate.timestamp);
        observations.insert(idx, (plate.timestamp, plate.mile));

        let mut candidates = Vec::with_capacity(2);
        if idx > 0 {
            candidates.push((observations[idx - 1], observations[idx]));
        }
        if idx + 1 < observations.len() {
            candidates.push((observations[idx], observations[idx + 1]));
        }

        let limit = road.limit;

        let mut tickets = Vec::new();
        for ((t1, m1), (t2, m2)) in candidates {
            if t2 <= t1 {
                continue;
            }

            let distance = f64::from(m1.abs_diff(m2));
            let elapsed = f64::from(t2 - t1);
            let speed_mph = (distance / elapsed) * 3600.0;

            if speed_mph.round() <= f64::from(limit) {
                continue;
            }

            if !self.should_ticket(&plate.plate, t1, t2) {
                continue;
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let speed = (speed_mph * 100.0).round().clamp(0.0, f64::from(u16::MAX)) as u16;

            tickets.push(Ticket {
                plate: plate.plate.clone(),
                road: plate.road,
                mile1: m1,
                timestamp1: t1,
                mile2: m2,
                timestamp2: t2,
                speed,
            });
        }

        tickets
    }

    /// A plate may be ticketed at most once per UTC day (`⌊t/86400⌋`); a
    /// ticket spanning several days consumes all of them.
    fn should_ticket(&mut self, plate: &str, t1: u32, t2: u32) -> bool {
        let day_start = i64::from(t1) / 86400;
        let day_end = i64::from(t2) / 86400;

        let ticketed = self.ticketed_days.entry(plate.to_string()).or_default();
        if (day_start..=day_end).any(|day| ticketed.contains(&day)) {
            return false;
        }
        ticketed.extend(day_start..=day_end);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{Controller, Plate};

    fn observe(road: u16, limit: u16, mile: u16, timestamp: u32, plate: &str) -> Plate {
        Plate {
            plate: plate.to_string(),
            road,
            limit,
            mile,
            timestamp,
        }
    }

    #[test]
    fn tickets_when_average_speed_exceeds_limit() {
        let mut controller = Controller::default();

        assert!(controller
            .signal(observe(123, 60, 8, 0, "UN1X"))
            .is_empty());

        let tickets = controller.signal(observe(123, 60, 9, 45, "UN1X"));
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].speed, 8000);
        assert_eq!(tickets[0].mile1, 8);
        assert_eq!(tickets[0].mile2, 9);
    }

    #[test]
    fn does_not_ticket_under_limit() {
        let mut controller = Controller::default();
        controller.signal(observe(1, 100, 0, 0, "ABC123"));
        let tickets = controller.signal(observe(1, 100, 1, 3600, "ABC123"));
        assert!(tickets.is_empty());
    }

    #[test]
    fn skips_out_of_order_but_same_timestamp_pair() {
        let mut controller = Controller::default();
        controller.signal(observe(1, 60, 0, 100, "ABC123"));
        let tickets = controller.signal(observe(1, 60, 10, 100, "ABC123"));
        assert!(tickets.is_empty());
    }

    #[test]
    fn one_ticket_per_plate_per_day() {
        let mut controller = Controller::default();
        controller.signal(observe(1, 60, 0, 0, "ABC123"));
        let first = controller.signal(observe(1, 60, 100, 60, "ABC123"));
        assert_eq!(first.len(), 1);

        controller.signal(observe(1, 60, 0, 120, "ABC123"));
        let second = controller.signal(observe(1, 60, 100, 180, "ABC123"));
        assert!(second.is_empty());
    }

    #[test]
    fn tickets_non_adjacent_cameras_when_one_is_skipped() {
        let mut controller = Controller::default();
        // Camera at mile 1 never saw this car; mile 0 to mile 2 in 60s is
        // still a violation even though those cameras aren't neighbours.
        controller.signal(observe(1, 60, 0, 0, "SKIP1"));
        let tickets = controller.signal(observe(1, 60, 2, 60, "SKIP1"));
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].mile1, 0);
        assert_eq!(tickets[0].mile2, 2);
    }
}

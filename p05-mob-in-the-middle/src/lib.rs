//! Mob in the middle
//!
//! A line-oriented TCP proxy sitting between a client and a fixed
//! upstream. Every line crossing the proxy in either direction has each
//! whitespace-delimited token that looks like a Boguscoin address (`7`
//! followed by 25 to 34 further alphanumeric characters, the whole token)
//! rewritten to a fixed address before being forwarded.
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tracing::{debug, instrument, warn};

const TONY_ADDRESS: &str = "7YWHMfk9JZe0LM0g1ZauHuiSxhI";

fn is_boguscoin_token(token: &str) -> bool {
    let len = token.len();
    (26..=35).contains(&len)
        && token.starts_with('7')
        && token.chars().all(|c| c.is_ascii_alphanumeric())
}

fn rewrite_line(line: &str) -> String {
    line.split(' ')
        .map(|token| {
            if is_boguscoin_token(token) {
                TONY_ADDRESS
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[instrument(skip(from, to))]
async fn pump(from: tokio::net::tcp::OwnedReadHalf, mut to: tokio::net::tcp::OwnedWriteHalf) {
    let mut lines = BufReader::new(from).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let rewritten = rewrite_line(&line);
                debug!("{line} -> {rewritten}");

                if to.write_all(rewritten.as_bytes()).await.is_err() {
                    break;
                }
                if to.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("read error: {err:?}");
                break;
            }
        }
    }

    to.shutdown().await.ok();
}

#[instrument(skip(client))]
pub async fn handler(client: TcpStream, upstream_addr: String) {
    let upstream = match TcpStream::connect(&upstream_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("cannot connect to upstream {upstream_addr}: {err:?}");
            return;
        }
    };

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let to_upstream = pump(client_read, upstream_write);
    let to_client = pump(upstream_read, client_write);

    tokio::select! {
        () = to_upstream => {}
        () = to_client => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{is_boguscoin_token, rewrite_line};

    #[test]
    fn recognizes_minimum_length_token() {
        assert!(is_boguscoin_token(&format!("7{}", "a".repeat(25))));
    }

    #[test]
    fn recognizes_maximum_length_token() {
        assert!(is_boguscoin_token(&format!("7{}", "a".repeat(34))));
    }

    #[test]
    fn rejects_too_short() {
        assert!(!is_boguscoin_token(&format!("7{}", "a".repeat(24))));
    }

    #[test]
    fn rejects_too_long() {
        assert!(!is_boguscoin_token(&format!("7{}", "a".repeat(35))));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(!is_boguscoin_token(&format!("8{}", "a".repeat(26))));
    }

    #[test]
    fn rejects_non_alphanumeric() {
        assert!(!is_boguscoin_token("7abc-def-ghijklmnopqrstuvwxy"));
    }

    #[test]
    fn rewrites_standalone_address() {
        assert_eq!(
            rewrite_line("Send payment to 7F1u3wSD5RbOHQmupo9nx4TnhQ3"),
            "Send payment to 7YWHMfk9JZe0LM0g1ZauHuiSxhI"
        );
    }

    #[test]
    fn rewrites_address_at_line_start() {
        assert_eq!(
            rewrite_line("7F1u3wSD5RbOHQmupo9nx4TnhQ3 is my address"),
            "7YWHMfk9JZe0LM0g1ZauHuiSxhI is my address"
        );
    }

    #[test]
    fn leaves_non_address_tokens_alone() {
        assert_eq!(rewrite_line("[bob] hello there"), "[bob] hello there");
    }

    #[test]
    fn rewrites_multiple_addresses() {
        assert_eq!(
            rewrite_line("7F1u3wSD5RbOHQmupo9nx4TnhQ3 and 7LOZ79JLSbKiczpSwLmyPukV56Kw"),
            "7YWHMfk9JZe0LM0g1ZauHuiSxhI and 7YWHMfk9JZe0LM0g1ZauHuiSxhI"
        );
    }
}

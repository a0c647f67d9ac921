//! Prime time
//!
//! One JSON object per line. A request looks like:
//!
//! ```json
//! {"method":"isPrime","number":123}
//! ```
//!
//! and the server replies with a JSON object of the same form containing
//! a boolean `prime` field. `number` may be any JSON number, including a
//! float; primality only applies to integer-valued numbers, so a number
//! with a non-zero fractional part is simply not prime. Any malformed
//! request line causes the server to reply `}bad` and close the
//! connection.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct Request {
    method: String,
    number: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    method: &'static str,
    prime: bool,
}

#[instrument(skip(socket))]
pub async fn handler(mut socket: TcpStream) {
    let (read, mut write) = socket.split();
    let mut lines = BufReader::new(read).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match evaluate(&line) {
                Some(prime) => {
                    let response = Response {
                        method: "isPrime",
                        prime,
                    };
                    debug!("responding {response:?}");

                    let Ok(mut payload) = serde_json::to_vec(&response) else {
                        warn!("cannot serialize response");
                        break;
                    };
                    payload.push(b'\n');

                    if write.write_all(&payload).await.is_err() {
                        break;
                    }
                }
                None => {
                    warn!("malformed request: {line:?}");
                    write.write_all(b"}bad").await.ok();
                    break;
                }
            },
            Ok(None) => {
                info!("connection closed");
                break;
            }
            Err(err) => {
                warn!("read error: {err:?}");
                break;
            }
        }
    }
}

fn evaluate(line: &str) -> Option<bool> {
    let request: Request = serde_json::from_str(line).ok()?;

    if request.method != "isPrime" {
        return None;
    }

    let number = request.number.as_f64()?;

    if number.fract() != 0.0 {
        return Some(false);
    }

    #[allow(clippy::cast_possible_truncation)]
    if number < 2.0 || number > u64::MAX as f64 {
        return Some(false);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n = number as u64;

    Some(primes::is_prime(n))
}

#[cfg(test)]
mod tests {
    use super::evaluate;

    #[test]
    fn accepts_prime() {
        assert_eq!(evaluate(r#"{"method":"isPrime","number":7}"#), Some(true));
    }

    #[test]
    fn rejects_composite() {
        assert_eq!(evaluate(r#"{"method":"isPrime","number":8}"#), Some(false));
    }

    #[test]
    fn non_integer_is_not_prime_but_valid() {
        assert_eq!(
            evaluate(r#"{"method":"isPrime","number":7.5}"#),
            Some(false)
        );
    }

    #[test]
    fn negative_is_not_prime() {
        assert_eq!(evaluate(r#"{"method":"isPrime","number":-7}"#), Some(false));
    }

    #[test]
    fn wrong_method_is_malformed() {
        assert_eq!(evaluate(r#"{"method":"isPrimee","number":7}"#), None);
    }

    #[test]
    fn missing_number_is_malformed() {
        assert_eq!(evaluate(r#"{"method":"isPrime"}"#), None);
    }

    #[test]
    fn non_numeric_number_is_malformed() {
        assert_eq!(
            evaluate(r#"{"method":"isPrime","number":"7"}"#),
            None
        );
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert_eq!(evaluate("not json"), None);
    }
}

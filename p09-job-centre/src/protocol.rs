//! Line-delimited JSON request/response types.
use serde::Serialize;
use serde_json::{Map, Value};

use crate::centre::JobView;

#[derive(Debug, Clone)]
pub enum Request {
    Put { queue: String, pri: i64, job: Value },
    Get { queues: Vec<String>, wait: bool },
    Delete { id: u64 },
    Abort { id: u64 },
}

/// Parses one line of input, returning the human-readable error message a
/// client should see on failure (matched to the original service's wording).
pub fn parse(line: &str) -> Result<Request, String> {
    let value: Value = serde_json::from_str(line).map_err(|_| "Invalid JSON".to_string())?;
    let obj = value.as_object().ok_or_else(missing_request_key)?;
    let request = obj
        .get("request")
        .and_then(Value::as_str)
        .ok_or_else(missing_request_key)?;

    match request {
        "put" => parse_put(obj),
        "get" => parse_get(obj),
        "delete" => parse_id(obj).map(|id| Request::Delete { id }),
        "abort" => parse_id(obj).map(|id| Request::Abort { id }),
        _ => Err("Invalid request type".to_string()),
    }
}

fn missing_request_key() -> String {
    "Missing \"request\" key".to_string()
}

fn parse_put(obj: &Map<String, Value>) -> Result<Request, String> {
    let (queue, pri, job) = match (obj.get("queue"), obj.get("pri"), obj.get("job")) {
        (Some(queue), Some(pri), Some(job)) => (queue, pri, job),
        _ => return Err("Missing data".to_string()),
    };

    let pri = pri
        .as_i64()
        .filter(|&pri| pri >= 0)
        .ok_or_else(|| "bad priority".to_string())?;
    let queue = queue
        .as_str()
        .ok_or_else(|| "bad queue".to_string())?
        .to_string();
    if !job.is_object() {
        return Err("bad job".to_string());
    }

    Ok(Request::Put {
        queue,
        pri,
        job: job.clone(),
    })
}

fn parse_get(obj: &Map<String, Value>) -> Result<Request, String> {
    let queues = obj
        .get("queues")
        .and_then(Value::as_array)
        .ok_or_else(|| "bad request".to_string())?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| "bad request".to_string())?;
    let wait = obj.get("wait").and_then(Value::as_bool).unwrap_or(false);

    Ok(Request::Get { queues, wait })
}

fn parse_id(obj: &Map<String, Value>) -> Result<u64, String> {
    obj.get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| "bad job ID".to_string())
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pri: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        job: Option<Value>,
    },
    #[serde(rename = "no-job")]
    NoJob,
    #[serde(rename = "error")]
    Error { error: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok {
            id: None,
            queue: None,
            pri: None,
            job: None,
        }
    }

    pub fn put_ok(id: u64) -> Self {
        Response::Ok {
            id: Some(id),
            queue: None,
            pri: None,
            job: None,
        }
    }

    pub fn job(view: JobView) -> Self {
        Response::Ok {
            id: Some(view.id),
            queue: Some(view.queue),
            pri: Some(view.pri),
            job: Some(view.job),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { error: msg.into() }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Response always serializes")
    }
}

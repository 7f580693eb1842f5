//! narrate-hook: forwards one producer event to the narrator intake API.
//!
//! Reads a JSON object from stdin whose `kind` is `letter`, `message` or
//! `social`; the remaining fields are posted to the matching endpoint.
//! Exits silently on any failure so producers never stall on it.

use std::io::Read;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};

const NARRATOR_API: &str = "http://127.0.0.1:8768";

fn endpoint(kind: &str) -> Option<&'static str> {
    match kind {
        "letter" => Some("letter"),
        "message" => Some("message"),
        "social" => Some("social"),
        _ => None,
    }
}

/// Split the event into its endpoint and the body to post.
fn route(mut event: Map<String, Value>) -> Option<(&'static str, Value)> {
    let kind = event.remove("kind")?;
    let endpoint = endpoint(kind.as_str()?)?;
    Some((endpoint, Value::Object(event)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        return;
    }

    let Ok(Value::Object(event)) = serde_json::from_str::<Value>(&input) else {
        return;
    };
    let Some((endpoint, body)) = route(event) else {
        return;
    };

    let client = Client::builder()
        .connect_timeout(Duration::from_millis(300))
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_else(|_| Client::new());

    // Quick connectivity check, exit cleanly if the narrator is down
    if client
        .get(format!("{NARRATOR_API}/status"))
        .send()
        .await
        .is_err()
    {
        return;
    }

    let _ = client
        .post(format!("{NARRATOR_API}/{endpoint}"))
        .json(&body)
        .send()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn routes_by_kind_and_strips_it() {
        let (endpoint, body) =
            route(object(json!({"kind": "letter", "label": "Raid", "body": "Pirates!"}))).unwrap();
        assert_eq!(endpoint, "letter");
        assert_eq!(body, json!({"label": "Raid", "body": "Pirates!"}));

        let (endpoint, _) = route(object(json!({"kind": "social", "interaction": {}}))).unwrap();
        assert_eq!(endpoint, "social");
    }

    #[test]
    fn unknown_or_missing_kind_is_dropped() {
        assert!(route(object(json!({"kind": "quest", "text": "x"}))).is_none());
        assert!(route(object(json!({"text": "x"}))).is_none());
        assert!(route(object(json!({"kind": 3}))).is_none());
    }
}

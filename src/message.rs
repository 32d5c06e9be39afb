//! On-wire message schema.
//!
//! Every datagram carries one JSON object with `src`, `dst`, `leader`, and
//! `type` routing fields; `type` selects the payload variant. The format
//! keeps the legacy quirks of the control plane: booleans travel as the
//! strings `"true"`/`"false"`, request ids ride in a `MID` field, and log
//! entries are `[[key, value, client, MID], term]` arrays.

use serde::{Deserialize, Serialize};

use crate::types::{ReplicaId, Term};

/// A client write carried inside a log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WriteWire", into = "WriteWire")]
pub struct Write {
    pub key: String,
    pub value: String,
    /// Id of the client that issued the `put`.
    pub client: ReplicaId,
    /// The client's request id, echoed back in the eventual `ok`.
    pub mid: String,
}

type WriteWire = (String, String, ReplicaId, String);

impl From<WriteWire> for Write {
    fn from((key, value, client, mid): WriteWire) -> Self {
        Self { key, value, client, mid }
    }
}

impl From<Write> for WriteWire {
    fn from(write: Write) -> Self {
        (write.key, write.value, write.client, write.mid)
    }
}

/// One replicated log entry: a client write plus the term that accepted it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EntryWire", into = "EntryWire")]
pub struct Entry {
    pub write: Write,
    pub term: Term,
}

type EntryWire = (Write, Term);

impl From<EntryWire> for Entry {
    fn from((write, term): EntryWire) -> Self {
        Self { write, term }
    }
}

impl From<Entry> for EntryWire {
    fn from(entry: Entry) -> Self {
        (entry.write, entry.term)
    }
}

/// Routing envelope common to every message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: ReplicaId,
    pub dst: ReplicaId,
    /// The sender's current belief about who leads, `"FFFF"` when unknown.
    pub leader: ReplicaId,
    #[serde(flatten)]
    pub body: Body,
}

/// Per-type payloads, dispatched by the on-wire `type` tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Body {
    /// Boot announcement, broadcast once at startup.
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "get")]
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "put")]
    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    /// Successful client reply. `value` is present for `get` answers only;
    /// a missing key reads as the empty string.
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// Tells a client to resend its request to the envelope's `leader`.
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },
    /// Reserved; the current protocol never sends it.
    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },
    /// Leader heartbeat: asserts leadership and advertises the commit
    /// frontier. Carries no entries.
    #[serde(rename = "update")]
    Update { term: Term, commitlength: usize },
    VoteRequest {
        newterm: Term,
        /// The candidate's id; the historical field name is kept on the wire.
        votedfor: ReplicaId,
        #[serde(rename = "lastIndex")]
        last_index: usize,
        #[serde(rename = "lastTerm", default, skip_serializing_if = "Option::is_none")]
        last_term: Option<Term>,
    },
    VoteResponse {
        term: Term,
        #[serde(rename = "voted?", with = "string_bool")]
        granted: bool,
    },
    AppendEntry {
        term: Term,
        commitlength: usize,
        entries: Vec<Entry>,
        /// Length of the log prefix the entries extend.
        #[serde(rename = "lastIndex")]
        last_index: usize,
        /// Term of the final prefix entry; absent when the prefix is empty.
        #[serde(rename = "lastTerm", default, skip_serializing_if = "Option::is_none")]
        last_term: Option<Term>,
        kvstorelen: usize,
    },
    AppendEntryResponse {
        term: Term,
        #[serde(with = "string_bool")]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loglength: Option<usize>,
    },
}

/// Booleans travel as the strings `"true"`/`"false"` on this control plane.
mod string_bool {
    use serde::de::{self, Deserializer, Unexpected};
    use serde::{Deserialize, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match String::deserialize(deserializer)?.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(de::Error::invalid_value(
                Unexpected::Str(other),
                &"\"true\" or \"false\"",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(body: Body) -> Envelope {
        Envelope {
            src: ReplicaId::from("0000"),
            dst: ReplicaId::from("0001"),
            leader: ReplicaId::from("0000"),
            body,
        }
    }

    #[test]
    fn vote_response_wire_shape() {
        let msg = envelope(Body::VoteResponse { term: Term::from(4), granted: true });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "src": "0000",
                "dst": "0001",
                "leader": "0000",
                "type": "VoteResponse",
                "term": 4,
                "voted?": "true",
            })
        );
    }

    #[test]
    fn append_entry_wire_shape() {
        let entry = Entry {
            write: Write {
                key: "k1".into(),
                value: "v1".into(),
                client: ReplicaId::from("cafe"),
                mid: "m1".into(),
            },
            term: Term::from(2),
        };
        let msg = envelope(Body::AppendEntry {
            term: Term::from(2),
            commitlength: 1,
            entries: vec![entry],
            last_index: 1,
            last_term: Some(Term::from(1)),
            kvstorelen: 1,
        });

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "src": "0000",
                "dst": "0001",
                "leader": "0000",
                "type": "AppendEntry",
                "term": 2,
                "commitlength": 1,
                "entries": [[["k1", "v1", "cafe", "m1"], 2]],
                "lastIndex": 1,
                "lastTerm": 1,
                "kvstorelen": 1,
            })
        );
    }

    #[test]
    fn optional_fields_are_omitted() {
        let probe = envelope(Body::AppendEntry {
            term: Term::from(1),
            commitlength: 0,
            entries: Vec::new(),
            last_index: 0,
            last_term: None,
            kvstorelen: 0,
        });
        let value = serde_json::to_value(&probe).unwrap();
        assert!(value.get("lastTerm").is_none());

        let ack = envelope(Body::Ok { mid: "m9".into(), value: None });
        let value = serde_json::to_value(&ack).unwrap();
        assert!(value.get("value").is_none());
    }

    #[test]
    fn client_request_round_trip() {
        let raw = r#"{"src":"beef","dst":"0002","leader":"FFFF","type":"put","key":"a","value":"b","MID":"77"}"#;

        let msg: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.src, ReplicaId::from("beef"));
        assert!(msg.leader.is_broadcast());
        assert_eq!(
            msg.body,
            Body::Put { key: "a".into(), value: "b".into(), mid: "77".into() }
        );

        let reencoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(reencoded, serde_json::from_str::<serde_json::Value>(raw).unwrap());
    }

    #[test]
    fn string_bool_rejects_bare_booleans() {
        let raw = r#"{"src":"0000","dst":"0001","leader":"FFFF","type":"VoteResponse","term":1,"voted?":true}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }
}

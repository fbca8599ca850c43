//! The four line-prefixed administrative frames. These precede any JSON
//! decoding: the parser splits on `|` first, because the frame itself isn't
//! self-describing JSON the way [`crate::Envelope`] is.

use crate::{
    envelope::Envelope,
    errors::{
        ErrorKind,
        Result,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum AdminFrame {
    /// `REGISTER|<pid>|<host>|<port>`
    Register {
        participant_id: String,
        host: String,
        port: u16,
    },
    /// `VOTE_RESPONSE|<pid>|<json-message>`
    VoteResponse {
        participant_id: String,
        message: Envelope,
    },
    /// `ACK_RESPONSE|<pid>|<json-message>`
    AckResponse {
        participant_id: String,
        message: Envelope,
    },
    /// `HISTORY_REQUEST|<pid>|<json-message>`
    HistoryRequest {
        participant_id: String,
        message: Envelope,
    },
}

impl AdminFrame {
    /// Parses a raw payload as one of the four admin frames. The tail after
    /// the second `|` is re-joined before JSON decoding, since the JSON
    /// payload may itself contain `|` characters.
    pub fn parse(payload: &str) -> Result<AdminFrame> {
        let mut parts = payload.splitn(3, '|');
        let tag = parts
            .next()
            .ok_or_else(|| ErrorKind::MalformedAdminFrame {
                frame: payload.to_string(),
            })?;

        match tag {
            "REGISTER" => {
                let fields: Vec<&str> = payload.splitn(4, '|').collect();
                if fields.len() != 4 {
                    return Err(ErrorKind::MalformedAdminFrame {
                        frame: payload.to_string(),
                    }
                    .into());
                }
                let participant_id = fields[1].to_string();
                let host = fields[2].to_string();
                let port: u16 = fields[3].parse().map_err(|_| ErrorKind::MalformedAdminFrame {
                    frame: payload.to_string(),
                })?;

                Ok(AdminFrame::Register {
                    participant_id,
                    host,
                    port,
                })
            }
            "VOTE_RESPONSE" | "ACK_RESPONSE" | "HISTORY_REQUEST" => {
                let participant_id = parts
                    .next()
                    .ok_or_else(|| ErrorKind::MalformedAdminFrame {
                        frame: payload.to_string(),
                    })?
                    .to_string();
                let json_tail = parts.next().ok_or_else(|| ErrorKind::MalformedAdminFrame {
                    frame: payload.to_string(),
                })?;
                let message = Envelope::decode(json_tail.as_bytes())?;

                Ok(match tag {
                    "VOTE_RESPONSE" => AdminFrame::VoteResponse {
                        participant_id,
                        message,
                    },
                    "ACK_RESPONSE" => AdminFrame::AckResponse {
                        participant_id,
                        message,
                    },
                    _ => AdminFrame::HistoryRequest {
                        participant_id,
                        message,
                    },
                })
            }
            other => Err(ErrorKind::UnknownAdminTag {
                tag: other.to_string(),
            }
            .into()),
        }
    }

    /// Renders this frame back to the line-prefixed wire form.
    pub fn render(&self) -> Result<String> {
        Ok(match self {
            AdminFrame::Register {
                participant_id,
                host,
                port,
            } => format!("REGISTER|{}|{}|{}", participant_id, host, port),
            AdminFrame::VoteResponse {
                participant_id,
                message,
            } => format!(
                "VOTE_RESPONSE|{}|{}",
                participant_id,
                String::from_utf8_lossy(&message.encode()?)
            ),
            AdminFrame::AckResponse {
                participant_id,
                message,
            } => format!(
                "ACK_RESPONSE|{}|{}",
                participant_id,
                String::from_utf8_lossy(&message.encode()?)
            ),
            AdminFrame::HistoryRequest {
                participant_id,
                message,
            } => format!(
                "HISTORY_REQUEST|{}|{}",
                participant_id,
                String::from_utf8_lossy(&message.encode()?)
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageTag;

    #[test]
    fn parses_register() {
        let frame = AdminFrame::parse("REGISTER|P1|localhost|6001").unwrap();
        assert_eq!(
            frame,
            AdminFrame::Register {
                participant_id: "P1".to_string(),
                host: "localhost".to_string(),
                port: 6001,
            }
        );
    }

    #[test]
    fn round_trips_vote_response_through_render_and_parse() {
        let message = Envelope::bare(MessageTag::CanCommitVoteYes, "tx1");
        let frame = AdminFrame::VoteResponse {
            participant_id: "P1".to_string(),
            message: message.clone(),
        };

        let rendered = frame.render().unwrap();
        let reparsed = AdminFrame::parse(&rendered).unwrap();

        assert_eq!(frame, reparsed);
    }

    #[test]
    fn json_tail_containing_pipe_is_preserved() {
        // data value deliberately contains a `|` to exercise the re-join.
        let mut data = std::collections::BTreeMap::new();
        data.insert("note".to_string(), "a|b".to_string());
        let message = Envelope::new(MessageTag::AckAbort, "tx2", data);

        let rendered = AdminFrame::AckResponse {
            participant_id: "P2".to_string(),
            message: message.clone(),
        }
        .render()
        .unwrap();

        let reparsed = AdminFrame::parse(&rendered).unwrap();
        assert_eq!(
            reparsed,
            AdminFrame::AckResponse {
                participant_id: "P2".to_string(),
                message,
            }
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(AdminFrame::parse("BOGUS|x|y").is_err());
    }
}

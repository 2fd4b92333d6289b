use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// Encoding of the structured payloads sent back by the endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    MsgPack,
}

/// One incremental transcription update. Only the length of `partial` is
/// used for latency attribution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    #[serde(default)]
    pub partial: String,
}

/// Decodes one inbound frame.
///
/// Returns `Ok(None)` for control frames which do not count as the response
/// to a chunk. Text frames are always JSON, binary frames follow `format`.
pub fn decode_event(
    format: ResponseFormat,
    msg: Message,
) -> Result<Option<RecognitionEvent>, SessionError> {
    let event = match msg {
        Message::Text(text) => serde_json::from_str::<RecognitionEvent>(text.as_str())
            .map_err(|e| SessionError::Decode(e.to_string()))?,
        Message::Binary(bytes) => match format {
            ResponseFormat::Json => serde_json::from_slice::<RecognitionEvent>(bytes.as_ref())
                .map_err(|e| SessionError::Decode(e.to_string()))?,
            ResponseFormat::MsgPack => rmp_serde::from_slice::<RecognitionEvent>(bytes.as_ref())
                .map_err(|e| SessionError::Decode(e.to_string()))?,
        },
        Message::Close(frame) => {
            let err = match frame {
                Some(frame) => SessionError::peer_closed(Some(frame.code.into()), frame.reason.as_str()),
                None => SessionError::peer_closed(None, ""),
            };
            return Err(err);
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn decodes_json_text_and_binary() {
        let ev = decode_event(ResponseFormat::Json, Message::Text(r#"{"partial":"hel"}"#.into()))
            .unwrap()
            .unwrap();
        assert_eq!(ev.partial, "hel");

        let ev = decode_event(
            ResponseFormat::Json,
            Message::Binary(br#"{"partial":"hello","result":[]}"#.to_vec().into()),
        )
        .unwrap()
        .unwrap();
        assert_eq!(ev.partial, "hello");
    }

    #[test]
    fn missing_partial_is_empty() {
        let ev = decode_event(ResponseFormat::Json, Message::Text(r#"{"text":"final"}"#.into()))
            .unwrap()
            .unwrap();
        assert!(ev.partial.is_empty());
    }

    #[test]
    fn decodes_msgpack_binary() {
        let mut buf = Vec::new();
        let mut ser = rmp_serde::Serializer::new(&mut buf).with_struct_map();
        RecognitionEvent { partial: "abc".to_string() }.serialize(&mut ser).unwrap();

        let ev = decode_event(ResponseFormat::MsgPack, Message::Binary(buf.into()))
            .unwrap()
            .unwrap();
        assert_eq!(ev.partial, "abc");
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = decode_event(ResponseFormat::Json, Message::Text("not json".into())).unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }

    #[test]
    fn control_frames_are_skipped() {
        assert!(decode_event(ResponseFormat::Json, Message::Ping(Vec::new().into())).unwrap().is_none());
        assert!(decode_event(ResponseFormat::Json, Message::Pong(Vec::new().into())).unwrap().is_none());
    }

    #[test]
    fn close_frame_ends_the_session() {
        let frame = CloseFrame { code: CloseCode::Away, reason: "bye".into() };
        let err = decode_event(ResponseFormat::Json, Message::Close(Some(frame))).unwrap_err();
        assert_eq!(err.to_string(), "connection closed by peer (code 1001, reason: bye)");
    }
}

//! Host library exposed to scripts as native functions
//!
//! Optional trailing arguments may be omitted or passed as `null`.

use std::sync::Arc;
use std::time::Duration;

use script_js::NativeLibrary;
use script_net::{NetClient, Response};
use script_runtime::{current_execution, ChannelBus, Message};
use script_types::{RecordShape, RecordValue, ShapeRegistry, Value};

pub const MESSAGE_RECORD: &str = "message";
pub const RESPONSE_RECORD: &str = "response";

/// Register the record shapes the host library returns
pub fn register_shapes(shapes: &ShapeRegistry) {
    shapes.register(RecordShape::new(MESSAGE_RECORD).accessors(&["timestamp", "event", "params"]));
    shapes.register(RecordShape::new(RESPONSE_RECORD).accessors(&["code", "body"]));
}

/// Register `post_message`, `poll_message`, `make_request`, `open_websocket`,
/// `send_websocket_message`, `close_websocket` and `current_thread`
pub fn register_host_library(natives: &NativeLibrary, bus: Arc<ChannelBus>, net: Arc<NetClient>) {
    let post_bus = bus.clone();
    natives.register("post_message", move |args| {
        let channel = required_str(args, 0, "channel")?;
        let event = required_str(args, 1, "event")?;
        let params = optional(args, 2).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        post_bus.post_message(channel, Message::new(event, params));
        Ok(Value::Void)
    });

    let poll_bus = bus;
    natives.register("poll_message", move |args| {
        let channel = poll_bus.get_channel(required_str(args, 0, "channel")?);
        let message = match optional_millis(args, 1)? {
            Some(timeout) => channel.poll_message_timeout(timeout),
            None => channel.poll_message(),
        };
        Ok(message.map(message_record).into())
    });

    let request_net = net.clone();
    natives.register("make_request", move |args| {
        let method = required_str(args, 0, "method")?;
        let path = required_str(args, 1, "path")?;
        let query = optional_str(args, 2)?;
        let body = optional_str(args, 3)?;
        let timeout = optional_millis(args, 4)?;
        request_net
            .request(method, path, query, body, timeout)
            .map(|r| Value::from(response_record(r)))
            .map_err(|e| e.to_string())
    });

    let open_net = net.clone();
    natives.register("open_websocket", move |args| {
        let path = required_str(args, 0, "path")?;
        let query = optional_str(args, 1)?;
        let ping = optional_millis(args, 2)?;
        let channel = required_str(args, 3, "channel")?;
        open_net
            .open_stream(path, query, ping, channel)
            .map(Value::from)
            .map_err(|e| e.to_string())
    });

    let send_net = net.clone();
    natives.register("send_websocket_message", move |args| {
        let handle = required_handle(args, 0)?;
        let text = required_str(args, 1, "text")?;
        Ok(Value::Bool(send_net.send(handle, text)))
    });

    let close_net = net;
    natives.register("close_websocket", move |args| {
        let handle = required_handle(args, 0)?;
        let code = match optional(args, 1) {
            Some(v) => Some(
                v.as_i64()
                    .and_then(|c| u16::try_from(c).ok())
                    .ok_or_else(|| format!("code must be a close code, got {}", v))?,
            ),
            None => None,
        };
        let reason = optional_str(args, 2)?;
        Ok(Value::Bool(close_net.close(handle, code, reason)))
    });

    natives.register("current_thread", |_args| {
        Ok(current_execution()
            .map(|exec| exec.thread_name().to_string())
            .into())
    });
}

pub fn message_record(message: Message) -> RecordValue {
    RecordValue::new(MESSAGE_RECORD)
        .with("timestamp", message.timestamp().to_rfc3339())
        .with("event", message.event())
        .with("params", message.params().map(str::to_string))
}

pub fn response_record(response: Response) -> RecordValue {
    RecordValue::new(RESPONSE_RECORD)
        .with("code", i64::from(response.code))
        .with("body", response.body)
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument helpers
// ─────────────────────────────────────────────────────────────────────────────

fn optional(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|v| !v.is_void())
}

fn required_str<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, String> {
    match optional(args, index) {
        Some(v) => v
            .as_str()
            .ok_or_else(|| format!("{} must be a string, got {}", name, v.ty())),
        None => Err(format!("missing argument {}", name)),
    }
}

fn optional_str(args: &[Value], index: usize) -> Result<Option<&str>, String> {
    optional(args, index)
        .map(|v| {
            v.as_str()
                .ok_or_else(|| format!("argument {} must be a string, got {}", index, v.ty()))
        })
        .transpose()
}

fn optional_millis(args: &[Value], index: usize) -> Result<Option<Duration>, String> {
    match optional(args, index) {
        Some(v) => match v.as_i64() {
            Some(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms as u64))),
            Some(_) => Ok(None),
            None => Err(format!("argument {} must be milliseconds, got {}", index, v)),
        },
        None => Ok(None),
    }
}

fn required_handle(args: &[Value], index: usize) -> Result<u32, String> {
    let value = optional(args, index).ok_or("missing argument handle")?;
    value
        .as_i64()
        .and_then(|h| u32::try_from(h).ok())
        .ok_or_else(|| format!("handle must be a number, got {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_net::{NetError, Preferences};

    fn library() -> (NativeLibrary, Arc<ChannelBus>) {
        let natives = NativeLibrary::new();
        let bus = ChannelBus::new_shared();
        let net = Arc::new(NetClient::new(Arc::new(Preferences::new()), bus.clone()).unwrap());
        register_host_library(&natives, bus.clone(), net);
        (natives, bus)
    }

    #[test]
    fn test_post_and_poll() {
        let (natives, bus) = library();

        natives
            .call(
                "post_message",
                &["jobs".into(), "start".into(), r#"{"id":1}"#.into()],
            )
            .unwrap();
        natives
            .call("post_message", &["jobs".into(), "tick".into()])
            .unwrap();
        assert_eq!(bus.get_channel("jobs").len(), 2);

        let first = natives.call("poll_message", &["jobs".into()]).unwrap();
        let record = first.as_record().unwrap();
        assert_eq!(record.type_name, MESSAGE_RECORD);
        assert_eq!(record.get("event"), Some(&Value::from("start")));
        assert_eq!(record.get("params"), Some(&Value::from(r#"{"id":1}"#)));

        let second = natives.call("poll_message", &["jobs".into()]).unwrap();
        assert_eq!(second.as_record().unwrap().get("params"), Some(&Value::Void));

        let empty = natives
            .call("poll_message", &["jobs".into(), 20i64.into()])
            .unwrap();
        assert!(empty.is_void());
    }

    #[test]
    fn test_huge_poll_timeout() {
        let (natives, bus) = library();
        bus.post_message("jobs", Message::new("start", None));

        let polled = natives
            .call("poll_message", &["jobs".into(), i64::MAX.into()])
            .unwrap();
        assert_eq!(polled.as_record().unwrap().get("event"), Some(&Value::from("start")));
    }

    #[test]
    fn test_non_string_params_become_json() {
        let (natives, bus) = library();
        natives
            .call("post_message", &["c".into(), "e".into(), 42i64.into()])
            .unwrap();
        let msg = bus.get_channel("c").poll_message().unwrap();
        assert_eq!(msg.params(), Some("42"));
    }

    #[test]
    fn test_argument_errors() {
        let (natives, _) = library();
        let err = natives.call("post_message", &["c".into()]).unwrap_err();
        assert!(err.contains("event"));

        let err = natives
            .call("send_websocket_message", &["one".into(), "x".into()])
            .unwrap_err();
        assert!(err.contains("handle"));
    }

    #[test]
    fn test_network_errors_surface() {
        let (natives, _) = library();
        let err = natives
            .call("make_request", &["GET".into(), "/status".into()])
            .unwrap_err();
        assert_eq!(
            err,
            NetError::Configuration("base URL is not set".to_string()).to_string()
        );

        let sent = natives
            .call("send_websocket_message", &[5i64.into(), "hi".into()])
            .unwrap();
        assert_eq!(sent, Value::Bool(false));
    }

    #[test]
    fn test_current_thread_outside_script() {
        let (natives, _) = library();
        assert!(natives.call("current_thread", &[]).unwrap().is_void());
    }

    #[test]
    fn test_records_have_shapes() {
        let shapes = ShapeRegistry::new();
        register_shapes(&shapes);

        let record = response_record(Response {
            code: 201,
            body: "ok".to_string(),
        });
        let shape = shapes.shape_for(&record).unwrap();
        assert!(shape.has_method("code"));
        assert!(shape.has_method("body"));
        assert_eq!(record.get("code"), Some(&Value::Int(201)));
    }
}

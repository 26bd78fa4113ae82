//! Console and exception log entries
//!
//! Turns CDP `Runtime.consoleAPICalled` / `Runtime.exceptionThrown` events
//! into BiDi `log.entryAdded` payloads, including the printf-style text
//! rendering the console does.

use serde_json::{json, Value};

use crate::cdp::types::{
    RemoteObject, RuntimeConsoleApiCalledEvent, RuntimeExceptionThrownEvent,
};
use crate::realm::Realm;

/// Map a console method onto a BiDi log level. Note the level string for
/// `console.warn` is `warning`, not the method name.
pub fn level_for_method(method: &str) -> &'static str {
    match method {
        "debug" => "debug",
        "warn" | "warning" => "warning",
        "error" | "assert" => "error",
        _ => "info",
    }
}

fn value_text(arg: &RemoteObject) -> String {
    if let Some(value) = &arg.value {
        return match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(unserializable) = &arg.unserializable_value {
        return unserializable.clone();
    }
    arg.description.clone().unwrap_or_else(|| "undefined".to_string())
}

fn as_integer_text(arg: &RemoteObject) -> String {
    match arg.value.as_ref().and_then(Value::as_f64) {
        Some(number) => format!("{}", number.trunc() as i64),
        None => "NaN".to_string(),
    }
}

fn as_float_text(arg: &RemoteObject) -> String {
    match arg.value.as_ref().and_then(Value::as_f64) {
        Some(number) => format!("{}", number),
        None => "NaN".to_string(),
    }
}

/// Render console arguments the way the console tab would: when the first
/// argument is a format string, substitute `%s`/`%d`/`%i`/`%f`/`%o`/`%O`/`%c`
/// from the remaining arguments; otherwise join the stringified arguments
/// with single spaces.
pub fn format_console_text(args: &[RemoteObject]) -> String {
    let Some((first, rest)) = args.split_first() else {
        return String::new();
    };

    let format = match (&first.r#type[..], &first.value) {
        ("string", Some(Value::String(s))) if has_specifier(s) && !rest.is_empty() => s.clone(),
        _ => {
            return args
                .iter()
                .map(value_text)
                .collect::<Vec<_>>()
                .join(" ")
        }
    };

    let mut out = String::new();
    let mut remaining = rest.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('s') | Some('o') | Some('O') => {
                chars.next();
                match remaining.next() {
                    Some(arg) => out.push_str(&value_text(arg)),
                    None => out.push_str("%s"),
                }
            }
            Some('d') | Some('i') => {
                chars.next();
                match remaining.next() {
                    Some(arg) => out.push_str(&as_integer_text(arg)),
                    None => out.push_str("%d"),
                }
            }
            Some('f') => {
                chars.next();
                match remaining.next() {
                    Some(arg) => out.push_str(&as_float_text(arg)),
                    None => out.push_str("%f"),
                }
            }
            // Styling directives consume their argument and render nothing.
            Some('c') => {
                chars.next();
                remaining.next();
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    for arg in remaining {
        out.push(' ');
        out.push_str(&value_text(arg));
    }
    out
}

fn has_specifier(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(next) = chars.peek() {
                if matches!(next, 's' | 'd' | 'i' | 'f' | 'o' | 'O' | 'c') {
                    return true;
                }
            }
        }
    }
    false
}

/// Build the `log.entryAdded` params for a console call
pub async fn console_entry(realm: &Realm, event: &RuntimeConsoleApiCalledEvent) -> Value {
    let text = format_console_text(&event.args);
    let mut args = Vec::with_capacity(event.args.len());
    for arg in &event.args {
        match realm.serialize_cdp_object(arg).await {
            Ok(value) => args.push(value),
            Err(e) => {
                tracing::warn!("Failed to serialize console argument: {}", e);
                args.push(json!({ "type": "object" }));
            }
        }
    }
    json!({
        "type": "console",
        "level": level_for_method(&event.r#type),
        "source": { "realm": realm.realm_id(), "context": realm.context_id() },
        "text": text,
        "timestamp": event.timestamp,
        "method": event.r#type,
        "args": args,
    })
}

/// Build the `log.entryAdded` params for a thrown exception
pub async fn exception_entry(realm: &Realm, event: &RuntimeExceptionThrownEvent) -> Value {
    let text = match &event.exception_details.exception {
        Some(exception) => realm
            .stringify_object(exception)
            .await
            .unwrap_or_else(|_| event.exception_details.text.clone()),
        None => event.exception_details.text.clone(),
    };
    json!({
        "type": "javascript",
        "level": "error",
        "source": { "realm": realm.realm_id(), "context": realm.context_id() },
        "text": text,
        "timestamp": event.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_arg(s: &str) -> RemoteObject {
        RemoteObject {
            r#type: "string".to_string(),
            value: Some(json!(s)),
            ..Default::default()
        }
    }

    fn number_arg(n: f64) -> RemoteObject {
        RemoteObject {
            r#type: "number".to_string(),
            value: Some(json!(n)),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_args_join_with_spaces() {
        let args = vec![string_arg("foo"), number_arg(1.0)];
        assert_eq!(format_console_text(&args), "foo 1");
    }

    #[test]
    fn test_format_string_substitution() {
        let args = vec![string_arg("%s is %d"), string_arg("x"), number_arg(41.5)];
        assert_eq!(format_console_text(&args), "x is 41");
    }

    #[test]
    fn test_float_specifier() {
        let args = vec![string_arg("pi=%f"), number_arg(3.5)];
        assert_eq!(format_console_text(&args), "pi=3.5");
    }

    #[test]
    fn test_excess_args_appended() {
        let args = vec![string_arg("%s"), string_arg("a"), string_arg("b")];
        assert_eq!(format_console_text(&args), "a b");
    }

    #[test]
    fn test_missing_args_leave_specifier() {
        let args = vec![string_arg("%s %s"), string_arg("only")];
        assert_eq!(format_console_text(&args), "only %s");
    }

    #[test]
    fn test_style_specifier_consumes_silently() {
        let args = vec![string_arg("%cstyled"), string_arg("color: red")];
        assert_eq!(format_console_text(&args), "styled");
    }

    #[test]
    fn test_escaped_percent() {
        let args = vec![string_arg("100%% sure %s"), string_arg("yes")];
        assert_eq!(format_console_text(&args), "100% sure yes");
    }

    #[test]
    fn test_object_args_use_description() {
        let object = RemoteObject {
            r#type: "object".to_string(),
            description: Some("Object".to_string()),
            ..Default::default()
        };
        assert_eq!(format_console_text(&[string_arg("got"), object]), "got Object");
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for_method("log"), "info");
        assert_eq!(level_for_method("info"), "info");
        assert_eq!(level_for_method("debug"), "debug");
        assert_eq!(level_for_method("warn"), "warning");
        assert_eq!(level_for_method("error"), "error");
        assert_eq!(level_for_method("assert"), "error");
    }
}

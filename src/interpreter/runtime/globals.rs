//! The globals injected into every script's outermost scope.
//!
//! Three groups live here: pure functions (math, constructors), the platform
//! accessors that resolve live objects through the bridge, and the bindings
//! projected from the invocation snapshot (`message`, `user`, `args`, …).

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Duration as TimeDelta, NaiveDate, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rand::Rng;
use serde_json::json;

use crate::bridge::storage::StoredValue;
use crate::bridge::topic;
use crate::snapshot::InvocationSnapshot;

use super::err::{RuntimeErr, ValueErr};
use super::value::{value_from_json, NativeFun, RegexValue, Value};
use super::{ExecContext, Traversal};

macro_rules! native_map {
    ($($k:literal: $v:expr),* $(,)?) => {{
        let mut m: HashMap<String, Value> = HashMap::new();
        $(m.insert(String::from($k), Value::Native(NativeFun::new($k, $v)));)*
        m
    }}
}

/// The fixed namespace of host functions every script sees.
pub(super) fn global_frame() -> HashMap<String, Value> {
    native_map! {
        "floor": g_floor,
        "ceil": g_ceil,
        "round": g_round,
        "abs": g_abs,
        "min": g_min,
        "max": g_max,
        "sqrt": g_sqrt,
        "random": g_random,
        "Time": g_time,
        "Duration": g_duration,
        "Array": g_array,
        "Object": g_object,
        "RegExp": g_regexp,
        "Number": g_number,
        "String": g_string,
        "Boolean": g_boolean,
        "Message": g_message,
        "Member": g_member,
        "Role": g_role,
        "Channel": g_channel,
        "storage": g_storage,
        "parseArgs": g_parse_args,
    }
}

/// The bindings projected from the invocation snapshot.
pub(super) fn snapshot_bindings(snapshot: &InvocationSnapshot) -> HashMap<String, Value> {
    let mut m = HashMap::new();

    m.insert(String::from("message"), json_binding(&snapshot.message));
    m.insert(String::from("user"), json_binding(&snapshot.author));
    m.insert(String::from("channel"), json_binding(&snapshot.channel));
    m.insert(String::from("guild"), json_binding(&snapshot.guild));
    m.insert(
        String::from("mentions"),
        Value::new_list(snapshot.mentions.iter().map(json_binding).collect()),
    );
    m.insert(
        String::from("args"),
        Value::new_list(
            snapshot
                .args_words()
                .into_iter()
                .map(|w| Value::Str(w.to_string()))
                .collect(),
        ),
    );
    m.insert(String::from("argsRaw"), Value::Str(snapshot.args_raw.clone()));

    m
}

fn json_binding<T: serde::Serialize>(t: &T) -> Value {
    serde_json::to_value(t).map_or(Value::Null, |j| value_from_json(&j))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn num_arg(fun: &'static str, args: &[Value], i: usize) -> Traversal<f64> {
    match arg(args, i) {
        Value::Number(n) => Ok(n),
        _ => Err(ValueErr::InvalidArg(fun, "a Number argument"))?,
    }
}

// === math ===

fn g_floor(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(num_arg("floor", &args, 0)?.floor()))
}
fn g_ceil(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(num_arg("ceil", &args, 0)?.ceil()))
}
fn g_round(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(num_arg("round", &args, 0)?.round()))
}
fn g_abs(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(num_arg("abs", &args, 0)?.abs()))
}
fn g_sqrt(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(num_arg("sqrt", &args, 0)?.sqrt()))
}

fn g_min(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    fold_numbers("min", args, f64::min)
}
fn g_max(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    fold_numbers("max", args, f64::max)
}

fn fold_numbers(
    fun: &'static str,
    args: Vec<Value>,
    f: fn(f64, f64) -> f64,
) -> Traversal<Value> {
    let mut acc: Option<f64> = None;
    for (i, _) in args.iter().enumerate() {
        let n = num_arg(fun, &args, i)?;
        acc = Some(acc.map_or(n, |a| f(a, n)));
    }
    match acc {
        Some(n) => Ok(Value::Number(n)),
        None => Err(ValueErr::InvalidArg(fun, "at least one Number"))?,
    }
}

fn g_random(_: &mut ExecContext, _: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(rand::thread_rng().gen::<f64>()))
}

// === constructors ===

fn g_time(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    match arg(&args, 0) {
        Value::Null => Ok(Value::Time(Utc::now())),
        Value::Number(ms) => {
            if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
                Err(ValueErr::TimeOutOfRange)?
            }
            DateTime::<Utc>::from_timestamp_millis(ms as i64)
                .map(Value::Time)
                .ok_or_else(|| ValueErr::TimeOutOfRange.into())
        }
        Value::Str(s) => parse_time_text(&s)
            .map(Value::Time)
            .ok_or_else(|| ValueErr::BadTime(s).into()),
        v @ Value::Time(_) => Ok(v),
        _ => Err(ValueErr::InvalidArg("Time", "nothing, a Number, or a String"))?,
    }
}

fn parse_time_text(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
    }
    None
}

fn g_duration(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    match arg(&args, 0) {
        Value::Number(ms) => {
            if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
                Err(ValueErr::DurationOutOfRange)?
            }
            Ok(Value::Duration(TimeDelta::milliseconds(ms as i64)))
        }
        Value::Str(s) => parse_duration_text(&s)
            .map(Value::Duration)
            .ok_or_else(|| ValueErr::BadDuration(s).into()),
        v @ Value::Duration(_) => Ok(v),
        _ => Err(ValueErr::InvalidArg("Duration", "a Number or a String like '1d2h30m'"))?,
    }
}

/// Parse `1d2h3m4s500ms` forms. Units may appear in any order; at least one
/// number+unit pair is required.
pub(crate) fn parse_duration_text(s: &str) -> Option<TimeDelta> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms: i64 = 0;
    let mut chars = s.chars().peekable();
    let mut any = false;

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return None;
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let n: i64 = digits.parse().ok()?;
        let ms = match unit.as_str() {
            "w" => n.checked_mul(7 * 86_400_000)?,
            "d" => n.checked_mul(86_400_000)?,
            "h" => n.checked_mul(3_600_000)?,
            "m" => n.checked_mul(60_000)?,
            "s" => n.checked_mul(1000)?,
            "ms" => n,
            _ => return None,
        };
        total_ms = total_ms.checked_add(ms)?;
        any = true;
    }

    any.then(|| TimeDelta::milliseconds(total_ms))
}

fn g_array(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::new_list(args))
}

fn g_object(_: &mut ExecContext, _: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::new_map(IndexMap::new()))
}

fn g_regexp(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let pattern = match arg(&args, 0) {
        Value::Str(s) => s,
        Value::Regex(r) => return Ok(Value::Regex(r)),
        _ => Err(ValueErr::InvalidArg("RegExp", "a String pattern"))?,
    };
    let flags = match arg(&args, 1) {
        Value::Null => String::new(),
        Value::Str(f) => f,
        _ => Err(ValueErr::InvalidArg("RegExp", "a String flags argument"))?,
    };

    let compiled = RegexValue::compile(&pattern, &flags)?;
    Ok(Value::Regex(Rc::new(compiled)))
}

fn g_number(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(match arg(&args, 0) {
        Value::Null => Value::Number(0.0),
        Value::Bool(b) => Value::Number(if b { 1.0 } else { 0.0 }),
        v @ Value::Number(_) => v,
        Value::Str(s) => s.trim().parse::<f64>().map_or(Value::Null, Value::Number),
        Value::Time(t) => Value::Number(t.timestamp_millis() as f64),
        Value::Duration(d) => Value::Number(d.num_milliseconds() as f64),
        _ => Value::Null,
    })
}

fn g_string(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(arg(&args, 0).to_display_string()))
}

fn g_boolean(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Bool(arg(&args, 0).truth()))
}

// === platform accessors ===

/// Accept a raw id, a Number id, or a mention form (`<@1>`, `<@!1>`,
/// `<@&1>`, `<#1>`), yielding the bare id.
fn id_arg(fun: &'static str, args: &[Value], i: usize) -> Traversal<String> {
    match arg(args, i) {
        Value::Str(s) => Ok(strip_mention(&s)),
        Value::Number(n) if n.fract() == 0.0 && n >= 0.0 => {
            Ok(super::value::fmt_number(n))
        }
        _ => Err(ValueErr::InvalidArg(fun, "an id or mention"))?,
    }
}

fn strip_mention(s: &str) -> String {
    let trimmed = s
        .strip_prefix("<@!")
        .or_else(|| s.strip_prefix("<@&"))
        .or_else(|| s.strip_prefix("<@"))
        .or_else(|| s.strip_prefix("<#"))
        .and_then(|rest| rest.strip_suffix('>'));

    trimmed.unwrap_or(s).to_string()
}

fn accessor(
    ctx: &mut ExecContext,
    fun: &'static str,
    topic: &str,
    args: &[Value],
) -> Traversal<Value> {
    let id = id_arg(fun, args, 0)?;
    let payload = json!({ "guildId": ctx.guild_id(), "id": id });

    let result = ctx
        .host()
        .bridge
        .request(topic, payload)
        .map_err(RuntimeErr::from)?;
    Ok(value_from_json(&result))
}

fn g_message(ctx: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    accessor(ctx, "Message", topic::MESSAGE_GET, &args)
}
fn g_member(ctx: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    accessor(ctx, "Member", topic::MEMBER_GET, &args)
}
fn g_role(ctx: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    accessor(ctx, "Role", topic::ROLE_GET, &args)
}
fn g_channel(ctx: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    accessor(ctx, "Channel", topic::CHANNEL_GET, &args)
}

// === storage ===

fn g_storage(_: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let id = match arg(&args, 0) {
        Value::Str(s) => s,
        Value::Number(n) => super::value::fmt_number(n),
        _ => Err(ValueErr::InvalidArg("storage", "a String or Number id"))?,
    };

    // the handle is an object of natives bound to the storage id
    let this = Value::Str(id);
    let mut m = IndexMap::new();
    m.insert(String::from("get"), Value::Native(NativeFun::bound("get", storage_get, this.clone())));
    m.insert(String::from("has"), Value::Native(NativeFun::bound("has", storage_has, this.clone())));
    m.insert(String::from("set"), Value::Native(NativeFun::bound("set", storage_set, this.clone())));
    m.insert(String::from("delete"), Value::Native(NativeFun::bound("delete", storage_delete, this.clone())));
    m.insert(String::from("keys"), Value::Native(NativeFun::bound("keys", storage_keys, this.clone())));
    m.insert(String::from("all"), Value::Native(NativeFun::bound("all", storage_all, this)));

    Ok(Value::new_map(m))
}

fn storage_this(this: Option<&Value>) -> Traversal<String> {
    match this {
        Some(Value::Str(id)) => Ok(id.clone()),
        _ => Err(ValueErr::InvalidArg("storage", "a storage handle"))?,
    }
}

fn storage_key(args: &[Value], i: usize) -> Traversal<String> {
    match arg(args, i) {
        Value::Str(s) => Ok(s),
        Value::Number(n) => Ok(super::value::fmt_number(n)),
        _ => Err(ValueErr::InvalidArg("storage", "a String or Number key"))?,
    }
}

fn storage_get(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let key = storage_key(&args, 0)?;
    let guild = ctx.guild_id().to_string();

    let stored = ctx
        .host()
        .storage
        .get(&guild, &store_id, &key)
        .map_err(RuntimeErr::from)?;
    Ok(stored.as_ref().map_or(Value::Null, Value::from))
}

fn storage_has(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let key = storage_key(&args, 0)?;
    let guild = ctx.guild_id().to_string();

    let present = ctx
        .host()
        .storage
        .has(&guild, &store_id, &key)
        .map_err(RuntimeErr::from)?;
    Ok(Value::Bool(present))
}

fn storage_set(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let key = storage_key(&args, 0)?;
    let value = arg(&args, 1);

    // functions are rejected here, before anything touches the backend
    let stored = StoredValue::try_from(&value)?;
    let guild = ctx.guild_id().to_string();

    ctx.host()
        .storage
        .set(&guild, &store_id, &key, stored)
        .map_err(RuntimeErr::from)?;
    Ok(value)
}

fn storage_delete(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let key = storage_key(&args, 0)?;
    let guild = ctx.guild_id().to_string();

    let existed = ctx
        .host()
        .storage
        .delete(&guild, &store_id, &key)
        .map_err(RuntimeErr::from)?;
    Ok(Value::Bool(existed))
}

fn storage_keys(ctx: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let guild = ctx.guild_id().to_string();

    let keys = ctx
        .host()
        .storage
        .keys(&guild, &store_id)
        .map_err(RuntimeErr::from)?;
    Ok(Value::new_list(keys.into_iter().map(Value::Str).collect()))
}

fn storage_all(ctx: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let store_id = storage_this(this)?;
    let guild = ctx.guild_id().to_string();

    let doc = ctx
        .host()
        .storage
        .all(&guild, &store_id)
        .map_err(RuntimeErr::from)?;
    let entries = doc.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect();
    Ok(Value::new_map(entries))
}

// === argument parsing ===

/// Tokenize the invocation's remaining raw text against a declared type
/// sequence. Words beyond the declared types are ignored; declared types
/// beyond the words bind as Null, like missing call arguments.
fn g_parse_args(ctx: &mut ExecContext, _: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let words: Vec<String> = ctx
        .snapshot()
        .args_words()
        .into_iter()
        .map(String::from)
        .collect();

    let mut out = Vec::with_capacity(args.len());
    for (i, ty) in args.iter().enumerate() {
        let Value::Str(ty) = ty else {
            return Err(ValueErr::InvalidArg("parseArgs", "String type names").into());
        };

        let Some(word) = words.get(i) else {
            out.push(Value::Null);
            continue;
        };

        let parsed = match ty.to_lowercase().as_str() {
            "boolean" => match word.to_lowercase().as_str() {
                "true" | "yes" | "on" => Value::Bool(true),
                "false" | "no" | "off" => Value::Bool(false),
                _ => Err(ValueErr::InvalidArg("parseArgs", "a true/false word"))?,
            },
            "number" => word
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| ValueErr::InvalidArg("parseArgs", "a numeric word"))?,
            "duration" => parse_duration_text(word)
                .map(Value::Duration)
                .ok_or(ValueErr::InvalidArg("parseArgs", "a duration like '1h30m'"))?,
            "string" => Value::Str(word.clone()),
            "member" => accessor(ctx, "parseArgs", topic::MEMBER_GET, &[Value::Str(word.clone())])?,
            "role" => accessor(ctx, "parseArgs", topic::ROLE_GET, &[Value::Str(word.clone())])?,
            "channel" => accessor(ctx, "parseArgs", topic::CHANNEL_GET, &[Value::Str(word.clone())])?,
            _ => Err(ValueErr::InvalidArg(
                "parseArgs",
                "one of boolean/number/duration/member/role/channel/string",
            ))?,
        };
        out.push(parsed);
    }

    Ok(Value::new_list(out))
}

#[cfg(test)]
mod tests {
    use chrono::Duration as TimeDelta;

    use super::{parse_duration_text, strip_mention};

    #[test]
    fn duration_text_forms() {
        assert_eq!(parse_duration_text("90s"), Some(TimeDelta::seconds(90)));
        assert_eq!(
            parse_duration_text("1d2h3m4s"),
            Some(TimeDelta::milliseconds(93_784_000))
        );
        assert_eq!(parse_duration_text("500ms"), Some(TimeDelta::milliseconds(500)));
        assert_eq!(parse_duration_text(""), None);
        assert_eq!(parse_duration_text("5x"), None);
        assert_eq!(parse_duration_text("h"), None);
    }

    #[test]
    fn mention_forms_strip_to_ids() {
        assert_eq!(strip_mention("<@123>"), "123");
        assert_eq!(strip_mention("<@!123>"), "123");
        assert_eq!(strip_mention("<@&55>"), "55");
        assert_eq!(strip_mention("<#9>"), "9");
        assert_eq!(strip_mention("123"), "123");
    }
}

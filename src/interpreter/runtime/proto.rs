//! The per-type method tables ("prototypes").
//!
//! Each value type has a table of host methods; reading `value.method` hands
//! out a [`NativeFun`] bound to the value it was read from. The numeric
//! sub-kinds delegate: a Time or Duration that misses its own table falls
//! back to the Number table, reading itself as epoch/total milliseconds.
//!
//! Collection methods that take a callback thread the live [`ExecContext`]
//! into the call, so a user function invoked from inside `map` resolves its
//! captured scope and contributes to stack traces exactly like a direct call.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Datelike, Duration as TimeDelta, Timelike, Utc};
use once_cell::sync::Lazy;

use super::err::{TypeErr, ValueErr};
use super::value::{fmt_duration, NativeFnPtr, NativeFun, Value, ValueType};
use super::{ExecContext, Traversal};

type Table = HashMap<&'static str, NativeFnPtr>;

macro_rules! table {
    ($($k:literal: $v:expr),* $(,)?) => {{
        let mut m: Table = HashMap::new();
        $(m.insert($k, $v as NativeFnPtr);)*
        m
    }}
}

/// Resolve a method on a value. Returns the method bound to its receiver.
pub(super) fn lookup(value: &Value, name: &str) -> Option<NativeFun> {
    // every value renders; toString is reachable on every type
    if name == "toString" {
        return Some(NativeFun::bound("toString", any_to_string, value.clone()));
    }

    let primary: Option<&'static Table> = match value.ty() {
        ValueType::Str => Some(&*STR_PROTO),
        ValueType::List => Some(&*LIST_PROTO),
        ValueType::Map => Some(&*MAP_PROTO),
        ValueType::Number => Some(&*NUM_PROTO),
        ValueType::Time => Some(&*TIME_PROTO),
        ValueType::Duration => Some(&*DUR_PROTO),
        ValueType::Regex => Some(&*REGEX_PROTO),
        _ => None,
    };

    // numeric sub-kinds delegate to the Number table on a miss
    let fallback: Option<&'static Table> =
        matches!(value.ty(), ValueType::Time | ValueType::Duration).then(|| &*NUM_PROTO);

    for t in [primary, fallback].into_iter().flatten() {
        if let Some((&key, &f)) = t.get_key_value(name) {
            return Some(NativeFun::bound(key, f, value.clone()));
        }
    }

    None
}

// === argument plumbing ===

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

fn opt_arg(args: &[Value], i: usize) -> Option<Value> {
    match args.get(i) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    }
}

fn num_arg(fun: &'static str, args: &[Value], i: usize) -> Traversal<f64> {
    match arg(args, i) {
        Value::Number(n) => Ok(n),
        _ => Err(ValueErr::InvalidArg(fun, "a Number argument"))?,
    }
}

fn this_str(this: Option<&Value>) -> Traversal<String> {
    match this {
        Some(Value::Str(s)) => Ok(s.clone()),
        v => Err(expected(ValueType::Str, v))?,
    }
}

fn this_list(this: Option<&Value>) -> Traversal<super::value::ListValue> {
    match this {
        Some(Value::List(l)) => Ok(l.clone()),
        v => Err(expected(ValueType::List, v))?,
    }
}

fn this_map(this: Option<&Value>) -> Traversal<super::value::MapValue> {
    match this {
        Some(Value::Map(m)) => Ok(m.clone()),
        v => Err(expected(ValueType::Map, v))?,
    }
}

fn this_num(this: Option<&Value>) -> Traversal<f64> {
    // a Time or Duration arriving here came through delegation; it reads
    // as its millisecond value
    match this.and_then(Value::as_number) {
        Some(n) => Ok(n),
        None => Err(expected(ValueType::Number, this))?,
    }
}

fn this_time(this: Option<&Value>) -> Traversal<DateTime<Utc>> {
    match this {
        Some(Value::Time(t)) => Ok(*t),
        v => Err(expected(ValueType::Time, v))?,
    }
}

fn this_duration(this: Option<&Value>) -> Traversal<TimeDelta> {
    match this {
        Some(Value::Duration(d)) => Ok(*d),
        v => Err(expected(ValueType::Duration, v))?,
    }
}

fn this_regex(this: Option<&Value>) -> Traversal<Rc<super::value::RegexValue>> {
    match this {
        Some(Value::Regex(r)) => Ok(r.clone()),
        v => Err(expected(ValueType::Regex, v))?,
    }
}

fn expected(expected: ValueType, got: Option<&Value>) -> TypeErr {
    TypeErr::ExpectedType {
        expected,
        got: got.map_or(ValueType::Null, Value::ty),
    }
}

fn duration_arg(fun: &'static str, args: &[Value], i: usize) -> Traversal<TimeDelta> {
    match arg(args, i) {
        Value::Duration(d) => Ok(d),
        _ => Err(ValueErr::InvalidArg(fun, "a Duration argument"))?,
    }
}

fn any_to_string(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(this.map_or_else(String::new, Value::to_display_string)))
}

// === String ===

static STR_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "trim": str_trim,
    "upper": str_upper,
    "lower": str_lower,
    "split": str_split,
    "replace": str_replace,
    "startsWith": str_starts_with,
    "endsWith": str_ends_with,
    "includes": str_includes,
    "indexOf": str_index_of,
    "substring": str_substring,
    "charAt": str_char_at,
    "repeat": str_repeat,
    "match": str_match,
});

fn str_trim(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(this_str(this)?.trim().to_string()))
}

fn str_upper(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(this_str(this)?.to_uppercase()))
}

fn str_lower(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(this_str(this)?.to_lowercase()))
}

fn str_split(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;

    let parts: Vec<Value> = match opt_arg(&args, 0) {
        None => vec![Value::Str(s)],
        Some(Value::Str(sep)) if sep.is_empty() => {
            s.chars().map(|c| Value::Str(c.to_string())).collect()
        }
        Some(Value::Str(sep)) => s.split(&sep as &str).map(|p| Value::Str(p.to_string())).collect(),
        Some(Value::Regex(r)) => r.re.split(&s).map(|p| Value::Str(p.to_string())).collect(),
        Some(_) => Err(ValueErr::InvalidArg("split", "a String or RegExp separator"))?,
    };

    Ok(Value::new_list(parts))
}

fn str_replace(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let repl = match arg(&args, 1) {
        Value::Str(r) => r,
        v => v.to_display_string(),
    };

    let out = match arg(&args, 0) {
        // a plain string pattern replaces the first occurrence only
        Value::Str(pat) => s.replacen(&pat as &str, &repl, 1),
        Value::Regex(r) => {
            if r.global {
                r.re.replace_all(&s, repl.as_str()).into_owned()
            } else {
                r.re.replace(&s, repl.as_str()).into_owned()
            }
        }
        _ => Err(ValueErr::InvalidArg("replace", "a String or RegExp pattern"))?,
    };

    Ok(Value::Str(out))
}

fn str_starts_with(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let pat = arg(&args, 0).to_display_string();
    Ok(Value::Bool(s.starts_with(&pat)))
}

fn str_ends_with(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let pat = arg(&args, 0).to_display_string();
    Ok(Value::Bool(s.ends_with(&pat)))
}

fn str_includes(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let pat = arg(&args, 0).to_display_string();
    Ok(Value::Bool(s.contains(&pat)))
}

fn str_index_of(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let pat = arg(&args, 0).to_display_string();

    // character index, not byte index
    let idx = s.find(&pat)
        .map_or(-1.0, |byte| s[..byte].chars().count() as f64);
    Ok(Value::Number(idx))
}

fn str_substring(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as f64;

    let mut a = num_arg("substring", &args, 0)?.clamp(0.0, len) as usize;
    let mut b = match opt_arg(&args, 1) {
        Some(Value::Number(n)) => n.clamp(0.0, len) as usize,
        _ => chars.len(),
    };
    if a > b {
        std::mem::swap(&mut a, &mut b);
    }

    Ok(Value::Str(chars[a..b].iter().collect()))
}

fn str_char_at(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let i = num_arg("charAt", &args, 0)?;

    let c = (i >= 0.0 && i.fract() == 0.0)
        .then(|| s.chars().nth(i as usize))
        .flatten();
    Ok(c.map_or(Value::Str(String::new()), |c| Value::Str(c.to_string())))
}

fn str_repeat(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let n = num_arg("repeat", &args, 0)?;

    if !(0.0..=10_000.0).contains(&n) {
        Err(ValueErr::InvalidArg("repeat", "a count between 0 and 10000"))?
    }
    Ok(Value::Str(s.repeat(n as usize)))
}

fn str_match(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let s = this_str(this)?;
    let Value::Regex(r) = arg(&args, 0) else {
        return Err(ValueErr::InvalidArg("match", "a RegExp argument").into());
    };

    if r.global {
        // with the g flag, every full match
        let all: Vec<Value> = r.re.find_iter(&s)
            .map(|m| Value::Str(m.as_str().to_string()))
            .collect();
        return Ok(if all.is_empty() { Value::Null } else { Value::new_list(all) });
    }

    match r.re.captures(&s) {
        None => Ok(Value::Null),
        Some(caps) => {
            let groups = caps.iter()
                .map(|g| g.map_or(Value::Null, |m| Value::Str(m.as_str().to_string())))
                .collect();
            Ok(Value::new_list(groups))
        }
    }
}

// === Number (also the delegation target of Time and Duration) ===

static NUM_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "floor": num_floor,
    "ceil": num_ceil,
    "round": num_round,
    "abs": num_abs,
    "toFixed": num_to_fixed,
});

fn num_floor(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_num(this)?.floor()))
}

fn num_ceil(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_num(this)?.ceil()))
}

fn num_round(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_num(this)?.round()))
}

fn num_abs(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_num(this)?.abs()))
}

fn num_to_fixed(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let n = this_num(this)?;
    let digits = match opt_arg(&args, 0) {
        Some(Value::Number(d)) if (0.0..=20.0).contains(&d) => d as usize,
        None => 0,
        _ => Err(ValueErr::InvalidArg("toFixed", "a digit count between 0 and 20"))?,
    };
    Ok(Value::Str(format!("{n:.digits$}")))
}

// === Time ===

static TIME_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "year": time_year,
    "month": time_month,
    "day": time_day,
    "hour": time_hour,
    "minute": time_minute,
    "second": time_second,
    "millisecond": time_millisecond,
    "epoch": time_epoch,
    "format": time_format,
    "add": time_add,
    "sub": time_sub,
    "diff": time_diff,
    "setYear": time_set_year,
    "setMonth": time_set_month,
    "setDay": time_set_day,
    "setHour": time_set_hour,
    "setMinute": time_set_minute,
    "setSecond": time_set_second,
});

fn time_year(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.year() as f64))
}
fn time_month(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    // 1-12, as written on a calendar
    Ok(Value::Number(this_time(this)?.month() as f64))
}
fn time_day(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.day() as f64))
}
fn time_hour(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.hour() as f64))
}
fn time_minute(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.minute() as f64))
}
fn time_second(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.second() as f64))
}
fn time_millisecond(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.timestamp_subsec_millis() as f64))
}
fn time_epoch(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_time(this)?.timestamp_millis() as f64))
}

fn time_format(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let t = this_time(this)?;
    let formatted = match opt_arg(&args, 0) {
        Some(Value::Str(fmt)) => t.format(&fmt).to_string(),
        None => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        Some(_) => Err(ValueErr::InvalidArg("format", "a String format"))?,
    };
    Ok(Value::Str(formatted))
}

fn time_add(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let t = this_time(this)?;
    let d = duration_arg("add", &args, 0)?;
    t.checked_add_signed(d)
        .map(Value::Time)
        .ok_or_else(|| ValueErr::TimeOutOfRange.into())
}

fn time_sub(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let t = this_time(this)?;
    let d = duration_arg("sub", &args, 0)?;
    t.checked_sub_signed(d)
        .map(Value::Time)
        .ok_or_else(|| ValueErr::TimeOutOfRange.into())
}

fn time_diff(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let t = this_time(this)?;
    let Value::Time(other) = arg(&args, 0) else {
        return Err(ValueErr::InvalidArg("diff", "a Time argument").into());
    };
    Ok(Value::Duration(t - other))
}

fn with_date_part(
    t: DateTime<Utc>,
    part: &'static str,
    n: f64,
) -> Traversal<Value> {
    if n.fract() != 0.0 || !n.is_finite() {
        Err(ValueErr::InvalidArg(part, "an integer"))?
    }
    let n = n as i64;

    let changed = match part {
        "setYear" => t.with_year(n as i32),
        "setMonth" => t.with_month(n as u32),
        "setDay" => t.with_day(n as u32),
        "setHour" => t.with_hour(n as u32),
        "setMinute" => t.with_minute(n as u32),
        "setSecond" => t.with_second(n as u32),
        _ => unreachable!(),
    };

    changed.map(Value::Time)
        .ok_or_else(|| ValueErr::TimeOutOfRange.into())
}

fn time_set_year(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setYear", num_arg("setYear", &args, 0)?)
}
fn time_set_month(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setMonth", num_arg("setMonth", &args, 0)?)
}
fn time_set_day(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setDay", num_arg("setDay", &args, 0)?)
}
fn time_set_hour(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setHour", num_arg("setHour", &args, 0)?)
}
fn time_set_minute(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setMinute", num_arg("setMinute", &args, 0)?)
}
fn time_set_second(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    with_date_part(this_time(this)?, "setSecond", num_arg("setSecond", &args, 0)?)
}

// === Duration ===

static DUR_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "days": dur_days,
    "hours": dur_hours,
    "minutes": dur_minutes,
    "seconds": dur_seconds,
    "millis": dur_millis,
    "humanize": dur_humanize,
    "add": dur_add,
    "sub": dur_sub,
});

fn dur_days(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_duration(this)?.num_milliseconds() as f64 / 86_400_000.0))
}
fn dur_hours(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_duration(this)?.num_milliseconds() as f64 / 3_600_000.0))
}
fn dur_minutes(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_duration(this)?.num_milliseconds() as f64 / 60_000.0))
}
fn dur_seconds(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_duration(this)?.num_milliseconds() as f64 / 1000.0))
}
fn dur_millis(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Number(this_duration(this)?.num_milliseconds() as f64))
}
fn dur_humanize(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    Ok(Value::Str(fmt_duration(this_duration(this)?)))
}

fn dur_add(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let d = this_duration(this)?;
    let other = duration_arg("add", &args, 0)?;
    d.checked_add(&other)
        .map(Value::Duration)
        .ok_or_else(|| ValueErr::DurationOutOfRange.into())
}

fn dur_sub(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let d = this_duration(this)?;
    let other = duration_arg("sub", &args, 0)?;
    d.checked_sub(&other)
        .map(Value::Duration)
        .ok_or_else(|| ValueErr::DurationOutOfRange.into())
}

// === Array ===

static LIST_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "push": list_push,
    "pop": list_pop,
    "shift": list_shift,
    "unshift": list_unshift,
    "map": list_map,
    "filter": list_filter,
    "find": list_find,
    "findIndex": list_find_index,
    "every": list_every,
    "some": list_some,
    "forEach": list_for_each,
    "join": list_join,
    "sort": list_sort,
    "slice": list_slice,
    "indexOf": list_index_of,
    "includes": list_includes,
    "reverse": list_reverse,
    "concat": list_concat,
});

fn list_push(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let mut items = l.try_borrow_mut().map_err(super::err::RuntimeErr::from)?;
    items.extend(args);
    Ok(Value::Number(items.len() as f64))
}

fn list_pop(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let popped = l.try_borrow_mut().map_err(super::err::RuntimeErr::from)?.pop();
    Ok(popped.unwrap_or(Value::Null))
}

fn list_shift(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let mut items = l.try_borrow_mut().map_err(super::err::RuntimeErr::from)?;
    if items.is_empty() {
        return Ok(Value::Null);
    }
    Ok(items.remove(0))
}

fn list_unshift(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let mut items = l.try_borrow_mut().map_err(super::err::RuntimeErr::from)?;
    for (i, v) in args.into_iter().enumerate() {
        items.insert(i, v);
    }
    Ok(Value::Number(items.len() as f64))
}

/// Snapshot the elements, releasing the borrow before callbacks run, so a
/// callback that touches the same array does not trip the borrow guard.
fn snapshot(l: &super::value::ListValue) -> Vec<Value> {
    l.borrow().clone()
}

fn list_map(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    let mut out = vec![];
    for (i, v) in snapshot(&l).into_iter().enumerate() {
        out.push(ctx.call_value(&f, vec![v, Value::Number(i as f64)], at)?);
    }
    Ok(Value::new_list(out))
}

fn list_filter(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    let mut out = vec![];
    for (i, v) in snapshot(&l).into_iter().enumerate() {
        if ctx.call_value(&f, vec![v.clone(), Value::Number(i as f64)], at)?.truth() {
            out.push(v);
        }
    }
    Ok(Value::new_list(out))
}

fn list_find(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    for (i, v) in snapshot(&l).into_iter().enumerate() {
        if ctx.call_value(&f, vec![v.clone(), Value::Number(i as f64)], at)?.truth() {
            return Ok(v);
        }
    }
    Ok(Value::Null)
}

fn list_find_index(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    for (i, v) in snapshot(&l).into_iter().enumerate() {
        if ctx.call_value(&f, vec![v, Value::Number(i as f64)], at)?.truth() {
            return Ok(Value::Number(i as f64));
        }
    }
    Ok(Value::Number(-1.0))
}

fn list_every(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    for (i, v) in snapshot(&l).into_iter().enumerate() {
        if !ctx.call_value(&f, vec![v, Value::Number(i as f64)], at)?.truth() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn list_some(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    for (i, v) in snapshot(&l).into_iter().enumerate() {
        if ctx.call_value(&f, vec![v, Value::Number(i as f64)], at)?.truth() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn list_for_each(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let f = arg(&args, 0);
    let at = ctx.native_at();

    for (i, v) in snapshot(&l).into_iter().enumerate() {
        ctx.call_value(&f, vec![v, Value::Number(i as f64)], at)?;
    }
    Ok(Value::Null)
}

fn list_join(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let sep = match opt_arg(&args, 0) {
        Some(v) => v.to_display_string(),
        None => String::from(","),
    };

    let joined = l.borrow().iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(&sep);
    Ok(Value::Str(joined))
}

fn list_sort(ctx: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let cmp = opt_arg(&args, 0);
    let at = ctx.native_at();

    let mut items = snapshot(&l);
    let mut failure = None;

    match cmp {
        Some(f) => {
            // user comparator returns a Number, negative for "a before b";
            // the sort is stable and comparator errors surface afterwards
            items.sort_by(|a, b| {
                if failure.is_some() {
                    return Ordering::Equal;
                }
                match ctx.call_value(&f, vec![a.clone(), b.clone()], at) {
                    Ok(Value::Number(n)) => {
                        n.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
                    }
                    Ok(_) => Ordering::Equal,
                    Err(e) => {
                        failure = Some(e);
                        Ordering::Equal
                    }
                }
            });
        }
        None => {
            items.sort_by(|a, b| match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    x.partial_cmp(y).unwrap_or(Ordering::Equal)
                }
                _ => a.to_display_string().cmp(&b.to_display_string()),
            });
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    *l.try_borrow_mut().map_err(super::err::RuntimeErr::from)? = items;
    Ok(this.cloned().unwrap_or(Value::Null))
}

fn list_slice(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let items = l.borrow();
    let len = items.len() as f64;

    // negative indexes count from the end
    let resolve = |n: f64| -> usize {
        let i = if n < 0.0 { len + n } else { n };
        i.clamp(0.0, len) as usize
    };

    let a = match opt_arg(&args, 0) {
        Some(Value::Number(n)) => resolve(n),
        _ => 0,
    };
    let b = match opt_arg(&args, 1) {
        Some(Value::Number(n)) => resolve(n),
        _ => items.len(),
    };

    let out = if a < b { items[a..b].to_vec() } else { vec![] };
    Ok(Value::new_list(out))
}

fn list_index_of(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let needle = arg(&args, 0);

    let idx = l.borrow().iter()
        .position(|v| v.loose_eq(&needle))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::Number(idx))
}

fn list_includes(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let needle = arg(&args, 0);
    let found = l.borrow().iter().any(|v| v.loose_eq(&needle));
    Ok(Value::Bool(found))
}

fn list_reverse(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    l.try_borrow_mut().map_err(super::err::RuntimeErr::from)?.reverse();
    Ok(this.cloned().unwrap_or(Value::Null))
}

fn list_concat(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let l = this_list(this)?;
    let mut out = l.borrow().clone();

    for a in args {
        match a {
            Value::List(other) => out.extend(other.borrow().iter().cloned()),
            v => out.push(v),
        }
    }
    Ok(Value::new_list(out))
}

// === Object ===

static MAP_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "keys": map_keys,
    "values": map_values,
    "has": map_has,
    "delete": map_delete,
    "size": map_size,
});

fn map_keys(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let m = this_map(this)?;
    let keys = m.borrow().keys().map(|k| Value::Str(k.clone())).collect();
    Ok(Value::new_list(keys))
}

fn map_values(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let m = this_map(this)?;
    let values = m.borrow().values().cloned().collect();
    Ok(Value::new_list(values))
}

fn map_has(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let m = this_map(this)?;
    let key = arg(&args, 0).to_display_string();
    let has = m.borrow().contains_key(&key);
    Ok(Value::Bool(has))
}

fn map_delete(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let m = this_map(this)?;
    let key = arg(&args, 0).to_display_string();
    let removed = m.try_borrow_mut()
        .map_err(super::err::RuntimeErr::from)?
        .shift_remove(&key);
    Ok(Value::Bool(removed.is_some()))
}

fn map_size(_: &mut ExecContext, this: Option<&Value>, _: Vec<Value>) -> Traversal<Value> {
    let m = this_map(this)?;
    let len = m.borrow().len();
    Ok(Value::Number(len as f64))
}

// === RegExp ===

static REGEX_PROTO: Lazy<Table> = Lazy::new(|| table! {
    "test": regex_test,
    "exec": regex_exec,
});

fn regex_test(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let r = this_regex(this)?;
    let s = arg(&args, 0).to_display_string();
    Ok(Value::Bool(r.re.is_match(&s)))
}

fn regex_exec(_: &mut ExecContext, this: Option<&Value>, args: Vec<Value>) -> Traversal<Value> {
    let r = this_regex(this)?;
    let s = arg(&args, 0).to_display_string();

    match r.re.captures(&s) {
        None => Ok(Value::Null),
        Some(caps) => {
            let groups = caps.iter()
                .map(|g| g.map_or(Value::Null, |m| Value::Str(m.as_str().to_string())))
                .collect();
            Ok(Value::new_list(groups))
        }
    }
}

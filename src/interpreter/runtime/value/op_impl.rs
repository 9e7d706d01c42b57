//! Operator implementations on [`Value`].
//!
//! The arithmetic operators special-case the numeric sub-kinds:
//! `Time + Duration` is a Time, `Duration * Number` is a Duration, and so on.
//! Two plain Numbers never combine into a Time or a Duration, and `Time - Time`
//! is deliberately not defined at the operator level (`.diff()` exists for that).
//! `+` falls back to string concatenation when no numeric case applies.

use chrono::Duration as TimeDelta;

use crate::ast::op;
use crate::interpreter::runtime::err::{RuntimeErr, TypeErr, ValueErr};

use super::Value;

impl Value {
    /// Apply a unary operator to a computed value.
    pub fn apply_unary(self, o: op::Unary) -> Result<Value, RuntimeErr> {
        let ty = self.ty();
        match o {
            op::Unary::Plus => match self {
                v @ Value::Number(_) => Some(v),
                _ => None,
            },
            op::Unary::Minus => match self {
                Value::Number(n) => Some(Value::Number(-n)),
                Value::Duration(d) => Some(Value::Duration(-d)),
                _ => None,
            },
            op::Unary::LogNot => Some(Value::Bool(!self.truth())),
        }
        .ok_or_else(|| TypeErr::CannotUnary(o, ty).into())
    }

    /// Apply a binary operator between two computed values.
    pub fn apply_binary(self, o: op::Binary, right: Value) -> Result<Value, RuntimeErr> {
        use op::Binary::*;

        let tys = (self.ty(), right.ty());
        match o {
            Add => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Time(t), Value::Duration(d)) | (Value::Duration(d), Value::Time(t)) => t
                    .checked_add_signed(d)
                    .map(Value::Time)
                    .ok_or_else(|| ValueErr::TimeOutOfRange.into()),
                (Value::Duration(a), Value::Duration(b)) => a
                    .checked_add(&b)
                    .map(Value::Duration)
                    .ok_or_else(|| ValueErr::DurationOutOfRange.into()),
                // no numeric case applies: concatenate the string forms
                (a, b) => Ok(Value::Str(a.to_display_string() + &b.to_display_string())),
            },
            Sub => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
                (Value::Time(t), Value::Duration(d)) => t
                    .checked_sub_signed(d)
                    .map(Value::Time)
                    .ok_or_else(|| ValueErr::TimeOutOfRange.into()),
                (Value::Duration(a), Value::Duration(b)) => a
                    .checked_sub(&b)
                    .map(Value::Duration)
                    .ok_or_else(|| ValueErr::DurationOutOfRange.into()),
                // Time - Time is not an operator; scripts use .diff()
                _ => Err(TypeErr::CannotBinary(o, tys.0, tys.1).into()),
            },
            Mul => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
                (Value::Duration(d), Value::Number(n)) | (Value::Number(n), Value::Duration(d)) => {
                    scale_duration(d, n).map(Value::Duration)
                }
                _ => Err(TypeErr::CannotBinary(o, tys.0, tys.1).into()),
            },
            Div => match (self, right) {
                // IEEE semantics: dividing by zero is infinity, not an error
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
                (Value::Duration(d), Value::Number(n)) => {
                    scale_duration(d, 1.0 / n).map(Value::Duration)
                }
                _ => Err(TypeErr::CannotBinary(o, tys.0, tys.1).into()),
            },
            Mod => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a % b)),
                _ => Err(TypeErr::CannotBinary(o, tys.0, tys.1).into()),
            },
            Pow => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a.powf(b))),
                _ => Err(TypeErr::CannotBinary(o, tys.0, tys.1).into()),
            },
        }
    }

    /// Apply a comparison operator between two computed values.
    ///
    /// Equality never fails (cross-type compares are simply unequal).
    /// Order comparisons require two values of the same ordered type.
    pub fn apply_cmp(&self, o: op::Cmp, right: &Value) -> Result<bool, RuntimeErr> {
        match o {
            op::Cmp::Eq => Ok(self.loose_eq(right)),
            op::Cmp::Ne => Ok(!self.loose_eq(right)),
            _ => match (self, right) {
                (Value::Number(a), Value::Number(b)) => Ok(o.cmp(a, b)),
                (Value::Str(a), Value::Str(b)) => Ok(o.cmp(a, b)),
                (Value::Time(a), Value::Time(b)) => Ok(o.cmp(a, b)),
                (Value::Duration(a), Value::Duration(b)) => Ok(o.cmp(a, b)),
                _ => Err(TypeErr::CannotCmp(o, self.ty(), right.ty()).into()),
            },
        }
    }
}

/// Scale a duration by a float, through milliseconds.
fn scale_duration(d: TimeDelta, factor: f64) -> Result<TimeDelta, RuntimeErr> {
    let ms = d.num_milliseconds() as f64 * factor;
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return Err(ValueErr::DurationOutOfRange.into());
    }
    Ok(TimeDelta::milliseconds(ms as i64))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as TimeDelta, TimeZone, Utc};

    use crate::ast::op::Binary;

    use super::Value;

    #[test]
    fn time_plus_duration_is_time() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let result = Value::Time(t)
            .apply_binary(Binary::Add, Value::Duration(TimeDelta::hours(2)))
            .unwrap();

        assert_eq!(result, Value::Time(Utc.with_ymd_and_hms(2020, 1, 1, 2, 0, 0).unwrap()));
    }

    #[test]
    fn duration_plus_duration_is_duration() {
        let result = Value::Duration(TimeDelta::minutes(1))
            .apply_binary(Binary::Add, Value::Duration(TimeDelta::seconds(30)))
            .unwrap();

        assert_eq!(result, Value::Duration(TimeDelta::seconds(90)));
    }

    #[test]
    fn number_plus_number_is_never_time() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let epoch = t.timestamp_millis() as f64;

        let result = Value::Number(epoch)
            .apply_binary(Binary::Add, Value::Number(1.0))
            .unwrap();

        assert_eq!(result, Value::Number(epoch + 1.0));
    }

    #[test]
    fn time_minus_time_is_not_defined() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(Value::Time(t).apply_binary(Binary::Sub, Value::Time(t)).is_err());
    }

    #[test]
    fn plus_falls_back_to_string_concat() {
        let result = Value::Str(String::from("n = "))
            .apply_binary(Binary::Add, Value::Number(4.0))
            .unwrap();

        assert_eq!(result, Value::Str(String::from("n = 4")));
    }

    #[test]
    fn duration_times_number_is_duration() {
        let result = Value::Duration(TimeDelta::minutes(10))
            .apply_binary(Binary::Mul, Value::Number(3.0))
            .unwrap();

        assert_eq!(result, Value::Duration(TimeDelta::minutes(30)));
    }
}

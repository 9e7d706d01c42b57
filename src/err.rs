//! Underlying core behind the error reporting of the script engine.
//!
//! This module unifies the several different types of errors output by the other modules.
//! Other error types (e.g. [`LexErr`]) can implement the [`ScriptErr`] trait to keep track of the
//! error type's name and message.
//!
//! [`FullScriptErr`] does much of the work to convert [`ScriptErr`]s into a printed error,
//! pointing at the offending slice of the script source.
//!
//! [`LexErr`]: crate::lexer::LexErr

use std::collections::BTreeSet;
use std::fmt::Display;
use std::ops::{Bound, RangeBounds, RangeFrom, RangeInclusive};

/// Indicates a specific character in given code (zero-based line, zero-based column).
pub type Cursor = (usize /* line */, usize /* character */);

/// Indicates a contiguous range of characters in given code.
pub type CursorRange = RangeInclusive<Cursor>;

/// Errors that can be displayed to the script author.
///
/// This trait requires that the struct provides the name of the error type and the message
/// of the error (via `message`). Implementing these enables functionality to designate
/// *where* an error occurred and to produce a formatted error message.
pub trait ScriptErr: Sized {
    /// The name of the error type (e.g. `syntax error`, `runtime error`)
    fn err_name(&self) -> &'static str;

    /// The message associated with this error.
    fn message(&self) -> String;

    /// Designate that this error occurred at a specific position
    fn at(self, p: Cursor) -> FullScriptErr<Self> {
        FullScriptErr::new(self, vec![ErrPos::from_point(p)])
    }

    /// Designate that this error occurred within a range of positions
    fn at_range(self, range: impl RangeBounds<Cursor>) -> FullScriptErr<Self> {
        FullScriptErr::new(self, vec![ErrPos::from_range(range)])
    }

    /// Designate that this error occurred at an unknown position in the code
    fn at_unknown(self) -> FullScriptErr<Self> {
        FullScriptErr::new(self, vec![])
    }
}

impl<E: ScriptErr> From<E> for FullScriptErr<E> {
    fn from(err: E) -> Self {
        err.at_unknown()
    }
}

/// An error that has an associated position.
///
/// This struct is used by the engine to format and print script errors.
#[derive(PartialEq, Eq, Debug)]
pub struct FullScriptErr<E: ScriptErr> {
    pub(crate) err: E,
    pos: BTreeSet<ErrPos>,
}

#[derive(PartialEq, Eq, Debug)]
enum ErrPos {
    /// Error occurred at a specific point
    Point(Cursor),

    /// Error occurred at an inclusive range of points
    Range(CursorRange),

    /// Error occurred at a range of points, going to the end
    RangeFrom(RangeFrom<Cursor>),
}

impl ErrPos {
    fn from_point(p: Cursor) -> Self {
        Self::Point(p)
    }

    fn from_range(range: impl RangeBounds<Cursor>) -> Self {
        let start = match range.start_bound() {
            Bound::Included(p) | Bound::Excluded(p) => *p,
            Bound::Unbounded => (0, 0),
        };

        match range.end_bound() {
            Bound::Included(p) | Bound::Excluded(p) => {
                if p == &start {
                    ErrPos::Point(start)
                } else {
                    ErrPos::Range(start..=(*p))
                }
            }
            Bound::Unbounded => ErrPos::RangeFrom(start..),
        }
    }

    fn position(&self) -> String {
        match self {
            ErrPos::Point((lno, cno)) => format!("{}:{}", lno + 1, cno + 1),

            ErrPos::Range(ri) => {
                let (start_lno, start_cno) = ri.start();
                let (end_lno, end_cno) = ri.end();
                format!("{}:{}-{}:{}", start_lno + 1, start_cno + 1, end_lno + 1, end_cno + 1)
            }

            ErrPos::RangeFrom(RangeFrom { start }) => {
                let (start_lno, start_cno) = start;
                format!("{}:{}-..", start_lno + 1, start_cno + 1)
            }
        }
    }

    fn display_pointer(&self, src: &str) -> Vec<String> {
        match self {
            ErrPos::Point(p) => ptr_point(src, *p).into(),
            ErrPos::Range(r) => ptrs_range(src, r),
            ErrPos::RangeFrom(r) => ptrs_range(src, r),
        }
    }
}

impl PartialOrd for ErrPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ErrPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        fn key(pos: &ErrPos) -> (Cursor, Option<Cursor>) {
            match pos {
                ErrPos::Point(p) => (*p, Some(*p)),
                ErrPos::Range(r) => (*r.start(), Some(*r.end())),
                ErrPos::RangeFrom(r) => (r.start, None),
            }
        }

        let (lstart, lend) = key(self);
        let (rstart, rend) = key(other);

        // none last
        lstart.cmp(&rstart).then_with(|| match (lend, rend) {
            (Some(l), Some(r)) => l.cmp(&r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    }
}

/// Get line from original text, or an empty string if the line is not present.
///
/// Errors can point at the EOF position, which may sit past the last line.
fn get_line(orig_txt: &str, lno: usize) -> String {
    orig_txt.lines().nth(lno).unwrap_or_default().into()
}

fn ptr_point(orig_txt: &str, (lno, cno): Cursor) -> [String; 2] {
    let code = get_line(orig_txt, lno);
    let ptr = " ".repeat(cno) + "^";

    [code, ptr]
}
fn ptrs_range(orig_txt: &str, r: &impl RangeBounds<Cursor>) -> Vec<String> {
    let (start_lno, start_cno) = match r.start_bound() {
        Bound::Included(p) | Bound::Excluded(p) => *p,
        Bound::Unbounded => (0, 0),
    };
    let (end_lno, end_cno) = match r.end_bound() {
        Bound::Included(p) | Bound::Excluded(p) => *p,
        Bound::Unbounded => {
            let lcount = orig_txt.lines().count();
            if lcount == 0 {
                (0, 0)
            } else {
                let ccount = orig_txt.lines().last().unwrap().len();
                (lcount - 1, ccount.saturating_sub(1))
            }
        }
    };

    if (start_lno, start_cno) == (end_lno, end_cno) {
        ptr_point(orig_txt, (start_lno, start_cno)).into()
    } else if start_lno == end_lno {
        let code = get_line(orig_txt, start_lno);
        let width = end_cno.saturating_sub(start_cno) + 1;

        let ptrs = " ".repeat(start_cno) + &"~".repeat(width);

        vec![code, ptrs]
    } else {
        let mut lines = vec![];
        // after start pointer, ~ until the end of the line
        let start_code = get_line(orig_txt, start_lno);
        let start_len = start_code.len();

        let start_ptr = " ".repeat(start_cno)
            + "^"
            + &"~".repeat(start_len.saturating_sub(start_cno + 1));

        lines.push(start_code);
        lines.push(start_ptr);

        // ~ before the end pointer
        let end_code = get_line(orig_txt, end_lno);

        let end_ptr = "~".repeat(end_cno) + "^";

        lines.push(end_code);
        lines.push(end_ptr);

        lines
    }
}

impl<E: ScriptErr> FullScriptErr<E> {
    fn new(e: E, positions: impl IntoIterator<Item = ErrPos>) -> Self {
        Self { err: e, pos: positions.into_iter().collect() }
    }

    /// Access the inner error.
    pub fn inner(&self) -> &E {
        &self.err
    }

    /// The first position attached to this error (line, column), if any.
    pub fn first_pos(&self) -> Option<Cursor> {
        self.pos.iter().next().map(|p| match p {
            ErrPos::Point(c) => *c,
            ErrPos::Range(r) => *r.start(),
            ErrPos::RangeFrom(r) => r.start,
        })
    }

    /// The last position attached to this error (line, column), if any.
    pub fn last_pos(&self) -> Option<Cursor> {
        self.pos.iter().next_back().map(|p| match p {
            ErrPos::Point(c) => *c,
            ErrPos::Range(r) => *r.end(),
            ErrPos::RangeFrom(r) => r.start,
        })
    }

    /// Get a String designating where the error occurred
    /// and the message associated with the error.
    pub fn short_msg(&self) -> String {
        let line_fmt = self.pos.iter()
            .map(ErrPos::position)
            .collect::<Vec<_>>()
            .join(", ");

        if !line_fmt.trim().is_empty() {
            format!("{} :: {}: {}", line_fmt.trim(), self.err.err_name(), self.err.message())
        } else {
            format!("{}: {}", self.err.err_name(), self.err.message())
        }
    }

    /// Get a String designating where the error occurred,
    /// the message associated with the error,
    /// and a pointer to what happened at the line to cause the error.
    pub fn full_msg(&self, src: &str) -> String {
        let mut lines = vec![self.short_msg(), String::new()];

        for p in &self.pos {
            lines.extend(p.display_pointer(src));
        }

        lines.join("\n")
    }

    /// Map the inner error to another error.
    pub fn map<F: ScriptErr>(self, f: impl FnOnce(E) -> F) -> FullScriptErr<F> {
        FullScriptErr {
            err: f(self.err),
            pos: self.pos,
        }
    }

    /// Cast the inner error to another error.
    pub fn cast_err<F: ScriptErr + From<E>>(self) -> FullScriptErr<F> {
        self.map(F::from)
    }
}

impl<E: ScriptErr> Display for FullScriptErr<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short_msg())
    }
}

macro_rules! full_script_cast_impl {
    ($t:ty, $u:ty) => {
        impl From<$crate::err::FullScriptErr<$t>> for $crate::err::FullScriptErr<$u> {
            fn from(err: $crate::err::FullScriptErr<$t>) -> Self {
                err.cast_err()
            }
        }
    };
}
pub(crate) use full_script_cast_impl;

use std::sync::atomic::{AtomicI32, Ordering};

use sda_jdwp::consts::modifier_kind;
use sda_jdwp::{JdwpReader, Location, ObjectId, ReferenceTypeId};

use super::{DebugEvent, EventDetail, EventKind};
use crate::classes::ClassTable;
use crate::error::{ProtocolError, ProtocolResult};
use crate::identity::IdentityRegistry;
use crate::runtime::{ObjectRef, Runtime};

/// What a modifier may consult while matching.
pub(crate) struct MatchContext<'a> {
    pub runtime: &'a dyn Runtime,
    pub identity: &'a IdentityRegistry,
    pub classes: &'a ClassTable,
}

/// Class name pattern of a ClassMatch/ClassExclude modifier.
///
/// A leading `*` matches any prefix, a trailing `*` any suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassPattern {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

impl ClassPattern {
    pub fn parse(pattern: &str) -> Self {
        let leading = pattern.starts_with('*');
        let trailing = pattern.len() > 1 && pattern.ends_with('*');
        match (leading, trailing) {
            (true, true) => ClassPattern::Contains(pattern[1..pattern.len() - 1].to_string()),
            (true, false) => ClassPattern::EndsWith(pattern[1..].to_string()),
            (false, true) => ClassPattern::StartsWith(pattern[..pattern.len() - 1].to_string()),
            (false, false) => ClassPattern::Equals(pattern.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ClassPattern::Equals(p) => name == p,
            ClassPattern::StartsWith(p) => name.starts_with(p.as_str()),
            ClassPattern::EndsWith(p) => name.ends_with(p.as_str()),
            ClassPattern::Contains(p) => name.contains(p.as_str()),
        }
    }
}

/// Filter attached to an event request.
#[derive(Debug)]
pub enum Modifier {
    /// Fires on the n-th otherwise-matching occurrence, then never again.
    Count { remaining: AtomicI32 },
    ThreadOnly { thread: ObjectId },
    ClassOnly { class: ReferenceTypeId },
    ClassMatch { pattern: ClassPattern, exclude: bool },
    LocationOnly { location: Location },
    ExceptionOnly {
        /// `0` accepts any exception class.
        exception: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    Step { thread: ObjectId, size: i32, depth: i32 },
}

impl Modifier {
    pub fn count(n: i32) -> Self {
        Modifier::Count {
            remaining: AtomicI32::new(n),
        }
    }

    pub fn class_match(pattern: &str, exclude: bool) -> Self {
        Modifier::ClassMatch {
            pattern: ClassPattern::parse(pattern),
            exclude,
        }
    }

    pub fn decode(r: &mut JdwpReader<'_>) -> ProtocolResult<Self> {
        let kind = r.read_u8()?;
        let modifier = match kind {
            modifier_kind::COUNT => Modifier::count(r.read_i32()?),
            modifier_kind::THREAD_ONLY => Modifier::ThreadOnly {
                thread: r.read_object_id()?,
            },
            modifier_kind::CLASS_ONLY => Modifier::ClassOnly {
                class: r.read_reference_type_id()?,
            },
            modifier_kind::CLASS_MATCH => Modifier::class_match(&r.read_string()?, false),
            modifier_kind::CLASS_EXCLUDE => Modifier::class_match(&r.read_string()?, true),
            modifier_kind::LOCATION_ONLY => Modifier::LocationOnly {
                location: r.read_location()?,
            },
            modifier_kind::EXCEPTION_ONLY => Modifier::ExceptionOnly {
                exception: r.read_reference_type_id()?,
                caught: r.read_bool()?,
                uncaught: r.read_bool()?,
            },
            modifier_kind::STEP => Modifier::Step {
                thread: r.read_object_id()?,
                size: r.read_i32()?,
                depth: r.read_i32()?,
            },
            other => {
                return Err(ProtocolError::NotImplemented(format!(
                    "modifier kind {other}"
                )))
            }
        };
        Ok(modifier)
    }

    pub(crate) fn matches(
        &self,
        request_kind: EventKind,
        event: &DebugEvent,
        cx: &MatchContext<'_>,
    ) -> bool {
        match self {
            Modifier::Count { remaining } => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1))
                .map(|previous| previous == 1)
                .unwrap_or(false),
            Modifier::ThreadOnly { thread } | Modifier::Step { thread, .. } => {
                match cx.identity.object_for(*thread) {
                    Ok(Some(thread)) => event.thread == Some(thread),
                    _ => false,
                }
            }
            Modifier::ClassOnly { class } => {
                let Some(subject) = subject_class(request_kind, event, cx.runtime) else {
                    return false;
                };
                match cx.classes.class_for_id(*class) {
                    Ok(base) => cx.runtime.is_assignable(base, subject),
                    Err(err) => {
                        tracing::warn!(target: "sda.events", error = %err, "invalid class in ClassOnly modifier");
                        false
                    }
                }
            }
            Modifier::ClassMatch { pattern, exclude } => {
                let Some(subject) = subject_class(request_kind, event, cx.runtime) else {
                    return false;
                };
                pattern.matches(&cx.runtime.class_name(subject)) ^ exclude
            }
            Modifier::LocationOnly { location } => {
                let Some(point) = event.location() else {
                    return false;
                };
                let class = match cx.classes.class_for_id(location.class_id) {
                    Ok(class) => class,
                    Err(err) => {
                        tracing::warn!(target: "sda.events", error = %err, "invalid class in LocationOnly modifier");
                        return false;
                    }
                };
                let defining = cx.runtime.defining_class(point.method);
                defining == class
                    && cx.runtime.method_id(defining, point.method) == location.method_id
                    && point.offset == location.index
            }
            Modifier::ExceptionOnly {
                exception,
                caught,
                uncaught,
            } => {
                let EventDetail::Exception {
                    exception: thrown,
                    catch_location,
                    ..
                } = &event.detail
                else {
                    return false;
                };
                let is_caught = catch_location.is_some();
                if !((*caught && is_caught) || (*uncaught && !is_caught)) {
                    return false;
                }
                if *exception == 0 {
                    return true;
                }
                match cx.classes.class_for_id(*exception) {
                    Ok(class) => cx.runtime.is_instance(class, *thrown),
                    Err(err) => {
                        tracing::warn!(target: "sda.events", error = %err, "invalid class in ExceptionOnly modifier");
                        false
                    }
                }
            }
        }
    }
}

/// The class a class filter applies to: the prepared class for ClassPrepare
/// requests, otherwise the class defining the event's location.
fn subject_class(
    request_kind: EventKind,
    event: &DebugEvent,
    runtime: &dyn Runtime,
) -> Option<ObjectRef> {
    if request_kind == EventKind::ClassPrepare {
        return match event.detail {
            EventDetail::Class(class) => Some(class),
            _ => None,
        };
    }
    let subject = event
        .location()
        .map(|point| runtime.defining_class(point.method));
    if subject.is_none() {
        tracing::debug!(target: "sda.events", kind = ?event.kind, "no location to match class filter on");
    }
    subject
}

#[cfg(test)]
mod tests {
    use super::*;
    use sda_jdwp::JdwpWriter;

    #[test]
    fn class_patterns() {
        assert_eq!(
            ClassPattern::parse("java.lang.*"),
            ClassPattern::StartsWith("java.lang.".into())
        );
        assert_eq!(ClassPattern::parse("*.Foo"), ClassPattern::EndsWith(".Foo".into()));
        assert_eq!(ClassPattern::parse("*util*"), ClassPattern::Contains("util".into()));
        assert_eq!(ClassPattern::parse("a.B"), ClassPattern::Equals("a.B".into()));

        assert!(ClassPattern::parse("*").matches("anything"));
        assert!(ClassPattern::parse("*util*").matches("java.util.List"));
        assert!(!ClassPattern::parse("java.lang.*").matches("java.util.List"));
    }

    #[test]
    fn unsupported_modifier_kinds_are_not_implemented() {
        let mut w = JdwpWriter::new();
        w.write_u8(modifier_kind::FIELD_ONLY);
        let bytes = w.into_vec();
        let err = Modifier::decode(&mut JdwpReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::NotImplemented(_)));

        let bytes = [modifier_kind::CONDITIONAL, 0, 0, 0, 1];
        let err = Modifier::decode(&mut JdwpReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::NotImplemented(_)));
    }

    #[test]
    fn decodes_step_modifier() {
        let mut w = JdwpWriter::new();
        w.write_u8(modifier_kind::STEP);
        w.write_object_id(4);
        w.write_i32(1);
        w.write_i32(2);
        let bytes = w.into_vec();
        match Modifier::decode(&mut JdwpReader::new(&bytes)).unwrap() {
            Modifier::Step {
                thread,
                size,
                depth,
            } => assert_eq!((thread, size, depth), (4, 1, 2)),
            other => panic!("unexpected modifier {other:?}"),
        }
    }

    #[test]
    fn truncated_modifier_is_an_error() {
        let bytes = [modifier_kind::COUNT, 0];
        assert!(Modifier::decode(&mut JdwpReader::new(&bytes)).is_err());
    }
}

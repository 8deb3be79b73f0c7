//! Feature-gated instrumentation.
//!
//! `trace_span!` wraps a step (predict, one image, a pruning pass, a load)
//! and `trace_event!` / `trace_warn!` record its outcome as named events
//! with key/value fields. Both event macros go through `trace_emit!`, which
//! picks the `tracing` level macro. Without the `tracing` feature nothing is
//! emitted and field values are only evaluated.

#[cfg(feature = "tracing")]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::info_span!($name $(, $($field)*)?)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        $crate::trace::NoopSpan
    };
}

#[cfg(feature = "tracing")]
macro_rules! trace_emit {
    ($level:ident, $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::$level!(name: $name, $($key = $value),+)
    };
    ($level:ident, $name:expr $(,)?) => {
        tracing::$level!(name: $name, "{}", $name)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_emit {
    ($level:ident, $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        let _ = ($($value,)*);
    };
}

/// Info-level event: counts, thresholds, kept totals.
macro_rules! trace_event {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::trace::trace_emit!(info, $name $(, $key = $value)*)
    };
}

/// Warn-level event for work that was skipped, such as a layer left
/// unconverted.
macro_rules! trace_warn {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::trace::trace_emit!(warn, $name $(, $key = $value)*)
    };
}

pub(crate) use trace_emit;
pub(crate) use trace_event;
pub(crate) use trace_span;
pub(crate) use trace_warn;

/// Guard returned by `trace_span!` when tracing is compiled out.
#[cfg(not(feature = "tracing"))]
pub struct NoopSpan;

#[cfg(not(feature = "tracing"))]
impl NoopSpan {
    #[inline]
    pub fn entered(self) -> Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{trace_event, trace_span, trace_warn};

    #[test]
    fn macros_expand_with_and_without_fields() {
        let pruned = 3usize;
        let layer = String::from("head.score");
        let _span = trace_span!("step", layers = 2).entered();
        trace_event!("done");
        trace_event!("pruned", newly_pruned = pruned, threshold = 0.5f32);
        trace_warn!("skipped", layer = layer.as_str());
        assert_eq!(pruned, 3);
    }
}

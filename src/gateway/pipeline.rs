//! Pipeline Composer: resolves named policy slots plus custom anchored slots
//! into a single ordered middleware chain.
//!
//! [`GatewayNext`] already models "a request, the remaining middlewares, and
//! the terminal handler" as a recursive chain built from a
//! `Vec<BoxGatewayMiddleware>`. What it does not have is a way to say *insert
//! this custom thing after the cache policy but before idempotency* without
//! the caller manually computing an index. `PipelineBuilder` adds exactly
//! that on top, then hands off to [`wrap_gateway_pipeline`] for execution.

use std::collections::HashMap;

use crate::gateway::types::{BoxGatewayHandler, BoxGatewayMiddleware, wrap_gateway_pipeline};
use crate::types::{Request, Response};

/// Where a custom slot should be inserted relative to the named slots.
#[derive(Clone, Debug, Default)]
pub struct Anchor {
    pub after: Option<String>,
    pub before: Option<String>,
}

impl Anchor {
    pub fn after(name: impl Into<String>) -> Self {
        Self {
            after: Some(name.into()),
            before: None,
        }
    }

    pub fn before(name: impl Into<String>) -> Self {
        Self {
            after: None,
            before: Some(name.into()),
        }
    }

    pub fn between(after: impl Into<String>, before: impl Into<String>) -> Self {
        Self {
            after: Some(after.into()),
            before: Some(before.into()),
        }
    }

    pub fn tail() -> Self {
        Self::default()
    }
}

/// A named slot produced by a policy: a stable name plus a builder that
/// either yields a middleware or `None` ("skip this policy for this route").
pub struct NamedSlot {
    pub name: String,
    pub middleware: Option<BoxGatewayMiddleware>,
}

impl NamedSlot {
    pub fn new(name: impl Into<String>, middleware: Option<BoxGatewayMiddleware>) -> Self {
        Self {
            name: name.into(),
            middleware,
        }
    }
}

/// A caller-supplied slot carrying its own anchor.
pub struct CustomSlot {
    pub name: String,
    pub anchor: Anchor,
    pub middleware: BoxGatewayMiddleware,
}

impl CustomSlot {
    pub fn new(name: impl Into<String>, anchor: Anchor, middleware: BoxGatewayMiddleware) -> Self {
        Self {
            name: name.into(),
            anchor,
            middleware,
        }
    }
}

/// Error raised when a pipeline cannot be resolved at build time.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineBuildError {
    #[error("anchor references unknown slot `{0}`")]
    UnknownAnchor(String),
    #[error("custom slot `{slot}`: `after` anchor `{after}` is not earlier than `before` anchor `{before}`")]
    AfterNotBeforeBefore {
        slot: String,
        after: String,
        before: String,
    },
}

/// Accumulates named slots (in pipeline order) and custom slots (in
/// registration order), then resolves them into a single ordered chain.
#[derive(Default)]
pub struct PipelineBuilder {
    named: Vec<NamedSlot>,
    custom: Vec<CustomSlot>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, slot: NamedSlot) -> Self {
        self.named.push(slot);
        self
    }

    pub fn custom(mut self, slot: CustomSlot) -> Self {
        self.custom.push(slot);
        self
    }

    /// Resolves all slots into an ordered `Vec<BoxGatewayMiddleware>`.
    ///
    /// Named slots that built to `None` are skipped entirely — they do not
    /// occupy a position, but their name is still a valid anchor target for
    /// custom slots (so "insert after cache_policy" is well-defined even on
    /// a route where the cache policy slot produced nothing).
    pub fn resolve(self) -> Result<Vec<BoxGatewayMiddleware>, PipelineBuildError> {
        // position[i] = index in `named` this name corresponds to, in declared order.
        let mut position: HashMap<String, usize> = HashMap::new();
        for (idx, slot) in self.named.iter().enumerate() {
            position.insert(slot.name.clone(), idx);
        }

        // Validate every anchor name up front so an unknown anchor fails
        // deterministically regardless of how many customs share it.
        for slot in &self.custom {
            if let Some(name) = &slot.anchor.after
                && !position.contains_key(name)
            {
                return Err(PipelineBuildError::UnknownAnchor(name.clone()));
            }
            if let Some(name) = &slot.anchor.before
                && !position.contains_key(name)
            {
                return Err(PipelineBuildError::UnknownAnchor(name.clone()));
            }
            if let (Some(after), Some(before)) = (&slot.anchor.after, &slot.anchor.before) {
                let after_pos = position[after];
                let before_pos = position[before];
                if after_pos >= before_pos {
                    return Err(PipelineBuildError::AfterNotBeforeBefore {
                        slot: slot.name.clone(),
                        after: after.clone(),
                        before: before.clone(),
                    });
                }
            }
        }

        // Build a timeline of "tracks": one track per named-slot gap (before
        // the first, between each pair, and after the last), plus a tail
        // track for customs with no anchor at all. Each track holds, in
        // registration order, the customs resolved to that gap.
        let num_gaps = self.named.len() + 1;
        let mut before_gap: Vec<Vec<BoxGatewayMiddleware>> = (0..num_gaps).map(|_| Vec::new()).collect();

        for slot in self.custom {
            let gap = match (&slot.anchor.after, &slot.anchor.before) {
                (Some(after), Some(_)) => position[after] + 1,
                (Some(after), None) => position[after] + 1,
                (None, Some(before)) => position[before],
                (None, None) => num_gaps - 1,
            };
            before_gap[gap].push(slot.middleware);
        }

        let mut out = Vec::with_capacity(self.named.len() + before_gap.iter().map(Vec::len).sum::<usize>());
        for (idx, gap) in before_gap.into_iter().enumerate() {
            out.extend(gap);
            if idx < self.named.len()
                && let Some(mw) = self.named[idx].middleware.clone()
            {
                out.push(mw);
            }
        }
        Ok(out)
    }
}

/// Wraps a terminal handler with a resolved chain of gateway middleware,
/// returning a callable `(Request) -> Future<Response>` compatible with how
/// the router installs a route handler. The framework's `Incoming`-bodied
/// request is converted to a [`crate::gateway::types::GatewayRequest`] once,
/// at this boundary.
pub fn wrap(
    middlewares: Vec<BoxGatewayMiddleware>,
    endpoint: BoxGatewayHandler,
) -> impl Fn(Request) -> futures_util::future::BoxFuture<'static, Response> + Send + Sync + 'static {
    wrap_gateway_pipeline(middlewares, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A middleware that does nothing; tests only care about pointer identity
    /// and resolved ordering, not execution.
    fn noop(_name: &'static str) -> BoxGatewayMiddleware {
        Arc::new(move |req, next| Box::pin(async move { next.run(req).await }))
    }

    fn names(
        order: &[BoxGatewayMiddleware],
        tagged: &[(&'static str, BoxGatewayMiddleware)],
    ) -> Vec<&'static str> {
        order
            .iter()
            .map(|mw| {
                tagged
                    .iter()
                    .find(|(_, t)| Arc::ptr_eq(t, mw))
                    .map(|(n, _)| *n)
                    .unwrap_or("?")
            })
            .collect()
    }

    #[test]
    fn appends_unanchored_custom_at_tail() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");
        let tagged = vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())];

        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", Some(a)))
            .named(NamedSlot::new("b", Some(b)))
            .custom(CustomSlot::new("c", Anchor::tail(), c));

        let resolved = builder.resolve().unwrap();
        assert_eq!(names(&resolved, &tagged), vec!["a", "b", "c"]);
    }

    #[test]
    fn after_anchor_inserts_immediately_after() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");
        let tagged = vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())];

        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", Some(a)))
            .named(NamedSlot::new("b", Some(b)))
            .custom(CustomSlot::new("c", Anchor::after("a"), c));

        let resolved = builder.resolve().unwrap();
        assert_eq!(names(&resolved, &tagged), vec!["a", "c", "b"]);
    }

    #[test]
    fn before_anchor_inserts_immediately_before() {
        let a = noop("a");
        let b = noop("b");
        let c = noop("c");
        let tagged = vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())];

        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", Some(a)))
            .named(NamedSlot::new("b", Some(b)))
            .custom(CustomSlot::new("c", Anchor::before("b"), c));

        let resolved = builder.resolve().unwrap();
        assert_eq!(names(&resolved, &tagged), vec!["a", "c", "b"]);
    }

    #[test]
    fn multiple_customs_on_same_anchor_preserve_registration_order() {
        let a = noop("a");
        let c1 = noop("c1");
        let c2 = noop("c2");
        let tagged = vec![("a", a.clone()), ("c1", c1.clone()), ("c2", c2.clone())];

        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", Some(a)))
            .custom(CustomSlot::new("c1", Anchor::after("a"), c1))
            .custom(CustomSlot::new("c2", Anchor::after("a"), c2));

        let resolved = builder.resolve().unwrap();
        assert_eq!(names(&resolved, &tagged), vec!["a", "c1", "c2"]);
    }

    #[test]
    fn unknown_anchor_fails_build() {
        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", None))
            .custom(CustomSlot::new("c", Anchor::after("missing"), noop("c")));
        let err = builder.resolve().unwrap_err();
        assert_eq!(err, PipelineBuildError::UnknownAnchor("missing".into()));
    }

    #[test]
    fn after_must_precede_before() {
        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", None))
            .named(NamedSlot::new("b", None))
            .custom(CustomSlot::new(
                "c",
                Anchor::between("b", "a"),
                noop("c"),
            ));
        let err = builder.resolve().unwrap_err();
        assert_eq!(
            err,
            PipelineBuildError::AfterNotBeforeBefore {
                slot: "c".into(),
                after: "b".into(),
                before: "a".into(),
            }
        );
    }

    #[test]
    fn between_two_anchors_inserts_in_the_gap() {
        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", Some(noop("a"))))
            .named(NamedSlot::new("b", Some(noop("b"))))
            .named(NamedSlot::new("c", Some(noop("c"))))
            .custom(CustomSlot::new(
                "mid",
                Anchor::between("a", "c"),
                noop("mid"),
            ));
        let resolved = builder.resolve().unwrap();
        assert_eq!(resolved.len(), 4);
    }

    #[test]
    fn skipped_named_slot_still_valid_anchor_target() {
        let builder = PipelineBuilder::new()
            .named(NamedSlot::new("a", None))
            .named(NamedSlot::new("b", Some(noop("b"))))
            .custom(CustomSlot::new("c", Anchor::after("a"), noop("c")));
        let resolved = builder.resolve().unwrap();
        assert_eq!(resolved.len(), 2);
    }
}

//! Local rewrite rules and the sets the drivers run them from.
//!
//! A rule declares which operations it tracks; the drivers only offer it nodes whose operation
//! it tracks. Most rules are written against a typed [`OperationView`] and registered through
//! [`view_pattern`].

use std::{marker::PhantomData, sync::Arc};

use crate::backend::{
    error::PatternError, index::InstId, rewriter::ProgramRewriter, spec::Operation,
};

mod pattern_views;
pub use pattern_views::*;

/// Typed snapshot of one node, taken before a rule inspects it.
pub trait OperationView: Clone {
    /// Whether `op` is the kind of operation this view describes.
    fn tracks(op: &Operation) -> bool;
    fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self>;
}

/// A stateless local rewrite rule.
///
/// `match_and_rewrite` returns `Ok(false)` when the rule does not apply and must leave the
/// graph untouched in that case. `Err` aborts the enclosing pass.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
    /// Operations this rule wants to see; every operation by default.
    fn tracks(&self, op: &Operation) -> bool {
        let _ = op;
        true
    }
    /// Rules with a higher benefit are tried first on a node.
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError>;
}

/// A rule written against view `V`; the view decides which operations are tracked.
pub trait OpRewritePattern<V> {
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(&self, op: V, rewriter: &mut ProgramRewriter)
        -> Result<bool, PatternError>;
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

struct ViewRule<V, P> {
    rule: P,
    view: PhantomData<fn() -> V>,
}

impl<V, P> Pattern for ViewRule<V, P>
where
    V: OperationView,
    P: OpRewritePattern<V> + Send + Sync,
{
    fn name(&self) -> &str {
        self.rule.name()
    }

    fn tracks(&self, op: &Operation) -> bool {
        V::tracks(op)
    }

    fn benefit(&self) -> u16 {
        self.rule.benefit()
    }

    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        match V::extract(root, rewriter) {
            Some(view) => self.rule.match_and_rewrite(view, rewriter),
            None => Ok(false),
        }
    }
}

/// Wraps a rule over view `V` so it can be shared between passes.
pub fn view_pattern<V, P>(rule: P) -> Arc<dyn Pattern>
where
    V: OperationView + 'static,
    P: OpRewritePattern<V> + Send + Sync + 'static,
{
    Arc::new(ViewRule {
        rule,
        view: PhantomData::<fn() -> V>,
    })
}

/// Rules collected for one pass, in registration order.
#[derive(Default)]
pub struct PatternSet {
    rules: Vec<Arc<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P>(&mut self, rule: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.add_shared(Arc::new(rule))
    }

    pub fn add_shared(&mut self, rule: Arc<dyn Pattern>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn insert_view<V, P>(&mut self, rule: P) -> &mut Self
    where
        V: OperationView + 'static,
        P: OpRewritePattern<V> + Send + Sync + 'static,
    {
        self.add_shared(view_pattern::<V, P>(rule))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fixes the trial order: descending benefit, registration order among equals.
    pub fn freeze(mut self) -> FrozenPatternSet {
        self.rules.sort_by_key(|rule| std::cmp::Reverse(rule.benefit()));
        FrozenPatternSet { rules: self.rules }
    }
}

/// Ordered, immutable rules handed to the drivers.
#[derive(Clone)]
pub struct FrozenPatternSet {
    rules: Vec<Arc<dyn Pattern>>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules tracking `op`, with their slot in the trial order.
    pub fn matching<'a>(
        &'a self,
        op: &'a Operation,
    ) -> impl Iterator<Item = (usize, &'a dyn Pattern)> + 'a {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, rule)| rule.tracks(op))
            .map(|(slot, rule)| (slot, &**rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spec::ElementwiseUnaryOp;

    struct Eager(u16);

    impl Pattern for Eager {
        fn benefit(&self) -> u16 {
            self.0
        }

        fn match_and_rewrite(
            &self,
            _root: InstId,
            _rewriter: &mut ProgramRewriter,
        ) -> Result<bool, PatternError> {
            Ok(false)
        }
    }

    struct OnlyNeg;

    impl OpRewritePattern<ElementwiseUnaryOpView> for OnlyNeg {
        fn match_and_rewrite(
            &self,
            _op: ElementwiseUnaryOpView,
            _rewriter: &mut ProgramRewriter,
        ) -> Result<bool, PatternError> {
            Ok(false)
        }
    }

    #[test]
    fn freeze_orders_by_benefit_then_registration() {
        let mut set = PatternSet::new();
        set.add(Eager(1)).add(Eager(3)).add(Eager(1));
        let frozen = set.freeze();
        let op = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
        let benefits: Vec<u16> = frozen.matching(&op).map(|(_, rule)| rule.benefit()).collect();
        assert_eq!(benefits, vec![3, 1, 1]);
    }

    #[test]
    fn view_rules_only_track_their_operation() {
        let mut set = PatternSet::new();
        set.insert_view::<ElementwiseUnaryOpView, _>(OnlyNeg);
        let frozen = set.freeze();
        let neg = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
        let names: Vec<&str> = frozen.matching(&neg).map(|(_, rule)| rule.name()).collect();
        assert_eq!(names, vec!["OnlyNeg"]);
        assert_eq!(frozen.matching(&Operation::ListReverse { inplace: false }).count(), 0);
    }
}

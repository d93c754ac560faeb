//! Named collections of rewrite rules.
//!
//! A [`RewriteDatabase`] maps pass names to a traversal [`Strategy`], a list of rules and
//! optional trailing function passes. There is no global registry: callers construct a
//! database (usually via [`default_database`]) and hand it to the pipeline.

use std::sync::Arc;

use crate::backend::{
    driver::{GreedyConfig, Strategy},
    error::{DatabaseError, PassError},
    optimizer::{FunctionPass, OptimizeContext, PassResult},
    passes::{
        self, AllocOfDimShuffle, CollapseDimShuffleChain, CommonSubexpressionEliminationPass,
        DeadCodeEliminationPass, DimShuffleOfAlloc, DimShuffleOfReshape, DimShuffleOfSubtensor,
        EliminateDoubleNegation, EliminateIdentityDimShuffle, LocalMaxToMin,
        MaxAndArgmaxToArgMax, MaxAndArgmaxToReduce, PromoteListMutationInplace,
        ReduceOfNegation, ReshapeOfDimShuffle,
    },
    pattern::{
        view_pattern, AllocOpView, DimShuffleOpView, ElementwiseUnaryOpView,
        FrozenPatternSet, ListMutationOpView, MaxAndArgmaxOpView, Pattern, PatternSet,
        ReduceOpView, ReshapeOpView,
    },
    spec::Function,
};

struct PassDef {
    name: String,
    strategy: Strategy,
    config: GreedyConfig,
    rules: Vec<Arc<dyn Pattern>>,
    trailing: Vec<Arc<dyn FunctionPass>>,
}

#[derive(Default)]
pub struct RewriteDatabase {
    passes: Vec<PassDef>,
}

impl RewriteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an empty pass.
    pub fn define_pass(
        &mut self,
        name: &str,
        strategy: Strategy,
        config: GreedyConfig,
    ) -> Result<&mut Self, DatabaseError> {
        if self.find(name).is_some() {
            return Err(DatabaseError::DuplicatePass(name.to_string()));
        }
        self.passes.push(PassDef {
            name: name.to_string(),
            strategy,
            config,
            rules: Vec::new(),
            trailing: Vec::new(),
        });
        Ok(self)
    }

    /// Adds `rule` to every named pass.
    pub fn register<P>(&mut self, rule: P, passes: &[&str]) -> Result<&mut Self, DatabaseError>
    where
        P: Pattern + 'static,
    {
        self.register_shared(Arc::new(rule), passes)
    }

    pub fn register_shared(
        &mut self,
        rule: Arc<dyn Pattern>,
        passes: &[&str],
    ) -> Result<&mut Self, DatabaseError> {
        self.check_known(passes)?;
        for name in passes {
            if let Some(def) = self.find_mut(name) {
                def.rules.push(Arc::clone(&rule));
            }
        }
        Ok(self)
    }

    /// Appends a whole-function pass that runs after the rules of every named pass.
    pub fn register_function_pass(
        &mut self,
        pass: Arc<dyn FunctionPass>,
        passes: &[&str],
    ) -> Result<&mut Self, DatabaseError> {
        self.check_known(passes)?;
        for name in passes {
            if let Some(def) = self.find_mut(name) {
                def.trailing.push(Arc::clone(&pass));
            }
        }
        Ok(self)
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|def| def.name.as_str()).collect()
    }

    pub fn rule_names(&self, pass: &str) -> Result<Vec<String>, DatabaseError> {
        let def = self.lookup(pass)?;
        Ok(def.rules.iter().map(|rule| rule.name().to_string()).collect())
    }

    pub fn pattern_set(&self, pass: &str) -> Result<FrozenPatternSet, DatabaseError> {
        let def = self.lookup(pass)?;
        let mut set = PatternSet::new();
        for rule in &def.rules {
            set.add_shared(Arc::clone(rule));
        }
        Ok(set.freeze())
    }

    /// Builds an executable pass for `name`.
    pub fn build_pass(&self, name: &str) -> Result<Arc<dyn FunctionPass>, DatabaseError> {
        let def = self.lookup(name)?;
        Ok(Arc::new(DatabasePass {
            name: def.name.clone(),
            strategy: def.strategy,
            config: def.config.clone(),
            patterns: self.pattern_set(name)?,
            trailing: def.trailing.clone(),
        }))
    }

    /// Builds the named passes, in the given order.
    pub fn query(&self, names: &[&str]) -> Result<Vec<Arc<dyn FunctionPass>>, DatabaseError> {
        names.iter().map(|name| self.build_pass(name)).collect()
    }

    fn check_known(&self, passes: &[&str]) -> Result<(), DatabaseError> {
        for name in passes {
            self.lookup(name)?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&PassDef, DatabaseError> {
        self.find(name)
            .ok_or_else(|| DatabaseError::UnknownPass(name.to_string()))
    }

    fn find(&self, name: &str) -> Option<&PassDef> {
        self.passes.iter().find(|def| def.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut PassDef> {
        self.passes.iter_mut().find(|def| def.name == name)
    }
}

/// A database pass: its rules under the pass strategy, then any trailing function passes.
struct DatabasePass {
    name: String,
    strategy: Strategy,
    config: GreedyConfig,
    patterns: FrozenPatternSet,
    trailing: Vec<Arc<dyn FunctionPass>>,
}

impl FunctionPass for DatabasePass {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError> {
        let mut result = PassResult::default();
        if !self.patterns.is_empty() {
            cx.record_pass_run();
            let config = cx.clamp_greedy(&self.config);
            let stats = crate::backend::driver::apply_patterns(
                function,
                &self.patterns,
                self.strategy,
                &config,
            )?;
            result = passes::stats_to_result(stats);
        }
        for pass in &self.trailing {
            result = result.merge(pass.run(function, cx)?);
        }
        Ok(result)
    }
}

/// Database with the stock passes.
///
/// - `canonicalize` (fixed point): identity/chain dimshuffle folding, double negation.
/// - `uncanonicalize` (out2in): max_and_argmax splitting, max/min through negation and the
///   dimshuffle/alloc, dimshuffle/reshape and dimshuffle/subtensor folds.
/// - `fast_run`: CSE followed by DCE.
/// - `inplace` (out2in): list mutation promotion.
pub fn default_database() -> RewriteDatabase {
    let mut db = RewriteDatabase::new();
    if let Err(err) = populate_default(&mut db) {
        log::error!(target: "tgraph::optimizer", "default rewrite database is incomplete: {err}");
    }
    db
}

fn populate_default(db: &mut RewriteDatabase) -> Result<(), DatabaseError> {
    let no_dce = GreedyConfig {
        enable_dce: false,
        ..GreedyConfig::default()
    };
    db.define_pass("canonicalize", Strategy::FixedPoint, GreedyConfig::default())?
        .define_pass("uncanonicalize", Strategy::OutToIn, GreedyConfig::default())?
        .define_pass("fast_run", Strategy::FixedPoint, no_dce.clone())?
        .define_pass("inplace", Strategy::OutToIn, no_dce)?;

    db.register_shared(
        view_pattern::<DimShuffleOpView, _>(EliminateIdentityDimShuffle),
        &["canonicalize"],
    )?
    .register_shared(
        view_pattern::<DimShuffleOpView, _>(CollapseDimShuffleChain),
        &["canonicalize"],
    )?
    .register_shared(
        view_pattern::<ElementwiseUnaryOpView, _>(EliminateDoubleNegation),
        &["canonicalize"],
    )?;

    db.register_shared(
        view_pattern::<MaxAndArgmaxOpView, _>(MaxAndArgmaxToReduce),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<MaxAndArgmaxOpView, _>(MaxAndArgmaxToArgMax),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<ElementwiseUnaryOpView, _>(LocalMaxToMin),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<ReduceOpView, _>(ReduceOfNegation),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<DimShuffleOpView, _>(DimShuffleOfAlloc),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<AllocOpView, _>(AllocOfDimShuffle),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<ReshapeOpView, _>(ReshapeOfDimShuffle),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<DimShuffleOpView, _>(DimShuffleOfReshape),
        &["uncanonicalize"],
    )?
    .register_shared(
        view_pattern::<DimShuffleOpView, _>(DimShuffleOfSubtensor),
        &["uncanonicalize"],
    )?;

    db.register_function_pass(Arc::new(CommonSubexpressionEliminationPass), &["fast_run"])?
        .register_function_pass(Arc::new(DeadCodeEliminationPass), &["fast_run"])?;

    db.register_shared(
        view_pattern::<ListMutationOpView, _>(PromoteListMutationInplace),
        &["inplace"],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_defines_stock_passes() {
        let db = default_database();
        assert_eq!(
            db.pass_names(),
            vec!["canonicalize", "uncanonicalize", "fast_run", "inplace"]
        );
        let rules = db.rule_names("uncanonicalize").unwrap();
        assert!(rules.iter().any(|name| name == "LocalMaxToMin"));
        assert!(rules.iter().any(|name| name == "DimShuffleOfSubtensor"));
        assert!(db.rule_names("fast_run").unwrap().is_empty());
    }

    #[test]
    fn registering_into_unknown_pass_fails() {
        let mut db = RewriteDatabase::new();
        let err = db
            .register_shared(
                view_pattern::<DimShuffleOpView, _>(EliminateIdentityDimShuffle),
                &["nope"],
            )
            .err();
        assert_eq!(err, Some(DatabaseError::UnknownPass("nope".into())));
        db.define_pass("a", Strategy::OutToIn, GreedyConfig::default())
            .unwrap();
        assert!(db
            .define_pass("a", Strategy::FixedPoint, GreedyConfig::default())
            .is_err());
    }
}

pub mod alias;
pub mod builder;
pub mod compile;
pub mod database;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hashing;
pub mod index;
pub mod infer;
pub mod ir_utils;
pub mod optimizer;
pub mod passes;
pub mod pattern;
pub mod pipeline;
pub mod rewriter;
pub mod shape_helpers;
pub mod spec;
pub mod topology;

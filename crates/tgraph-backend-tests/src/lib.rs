pub mod smoke;

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use std::sync::Arc;

            use $crate::smoke;

            macro_rules! smoke_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let backend = Arc::new(($backend_ctor)());
                        smoke::$name(&backend);
                    }
                };
            }

            smoke_test!(dot_matches_expected);
            smoke_test!(block_diag_places_blocks);
            smoke_test!(solve_triangular_satisfies_system);
            smoke_test!(solve_triangular_rejects_non_finite);
            smoke_test!(check_finite_rejects_non_finite_results);
            smoke_test!(reduce_of_negation_matches_unoptimized);
            smoke_test!(max_and_argmax_split_matches_unoptimized);
            smoke_test!(reduce_max_propagates_nan);
            smoke_test!(dimshuffle_of_subtensor_folds_dropped_axis);
            smoke_test!(dimshuffle_of_subtensor_matches_unoptimized);
            smoke_test!(zero_runtime_step_fails_with_and_without_rewrites);
            smoke_test!(input_not_matching_declared_type_is_rejected);
            smoke_test!(dimshuffle_of_alloc_folds_into_alloc);
            smoke_test!(shape_i_reads_runtime_extent);
            smoke_test!(typed_list_operations);
            smoke_test!(list_errors_are_reported);
            smoke_test!(consumed_list_is_not_readable);
        }
    };
}

use tgraph_backend_faer::FaerPortableBackend;
use tgraph_rs::backend::spec::{Operation, PortableBackend};

tgraph_backend_tests::define_backend_tests!(faer_backend, FaerPortableBackend::new);

#[test]
fn faer_reports_native_linear_algebra() {
    let backend = FaerPortableBackend::new();
    assert_eq!(backend.backend_name(), "faer");
    assert!(backend.supports(&Operation::Dot));
    assert!(!backend.supports(&Operation::BlockDiag));
}

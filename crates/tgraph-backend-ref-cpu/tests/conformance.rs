use tgraph_backend_ref_cpu::CpuPortableBackend;

tgraph_backend_tests::define_backend_tests!(cpu_backend, CpuPortableBackend::new);

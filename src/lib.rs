//! Workspace shell. The publishable API lives in the member crates;
//! this package only hosts the cross-crate integration tests in `tests/`.

//! Cross-crate tests live under `tests/`; shared fixtures in `tests/common`.

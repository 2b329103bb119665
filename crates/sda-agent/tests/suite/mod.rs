// Consolidated integration test suite.
//
// Everything lives in one `tests` binary per crate; add new files here
// rather than as top-level test targets.
mod identity;
mod session;
mod stepping;

//! Manager-level tests against an in-memory world and a recording rasterizer

mod scenarios;

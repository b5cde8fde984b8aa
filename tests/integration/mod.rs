//! Integration tests for the weft workflow engine

mod config_integration;
mod flow_sequencing;
mod graph_export;
mod meta_flow;
mod refinement_loop;
mod thread_resume;

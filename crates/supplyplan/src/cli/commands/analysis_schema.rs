use anyhow::Result;

use super::emit;
use crate::models::{Envelope, analysis_json_schema};

const COMMAND: &str = "analysis_schema";

pub fn run() -> Result<()> {
    emit(&Envelope::ok(COMMAND, analysis_json_schema()))
}

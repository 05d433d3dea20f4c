use super::test_helpers::*;
use super::*;
use crate::types::{Event, JobOutcome};
use std::time::Duration;
use wiremock::MockServer;

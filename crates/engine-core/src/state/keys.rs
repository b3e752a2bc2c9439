//! Key layout of the durable state.
//!
//! ```text
//! /pipeline/jobs/{job_id}/config
//! /pipeline/jobs/{job_id}/items/{item}/progress
//! /pipeline/jobs/{job_id}/items/{item}/error
//! /pipeline/rules/{name}
//! ```

pub const JOBS: &str = "/pipeline/jobs";
pub const RULES: &str = "/pipeline/rules";

pub fn job(job_id: &str) -> String {
    format!("{JOBS}/{job_id}")
}

pub fn job_config(job_id: &str) -> String {
    format!("{JOBS}/{job_id}/config")
}

pub fn job_items(job_id: &str) -> String {
    format!("{JOBS}/{job_id}/items")
}

pub fn job_item_progress(job_id: &str, item: usize) -> String {
    format!("{JOBS}/{job_id}/items/{item}/progress")
}

pub fn job_item_error(job_id: &str, item: usize) -> String {
    format!("{JOBS}/{job_id}/items/{item}/error")
}

pub fn rule(name: &str) -> String {
    format!("{RULES}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_job_and_item() {
        assert_eq!(job_config("j1"), "/pipeline/jobs/j1/config");
        assert_eq!(
            job_item_progress("j1", 3),
            "/pipeline/jobs/j1/items/3/progress"
        );
        assert_eq!(job_item_error("j1", 0), "/pipeline/jobs/j1/items/0/error");
        assert!(job_item_error("j1", 0).starts_with(&job("j1")));
        assert_eq!(rule("default"), "/pipeline/rules/default");
    }
}

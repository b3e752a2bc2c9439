//! Whole jobs driven through `JobSupervisor` against fake shards.

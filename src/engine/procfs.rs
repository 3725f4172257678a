//! Thread enumeration via `/proc/self/task`

use crate::tid::Tid;
use std::fs;
use std::io;

const TASK_DIR: &str = "/proc/self/task";

/// One thread of this process at the moment of enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub tid: Tid,
    /// Scheduler state letter from `stat` (`R`, `S`, `D`, ...)
    pub state: char,
    /// Thread name (`comm`), at most 15 bytes
    pub name: String,
}

impl TaskInfo {
    pub fn is_running(&self) -> bool {
        self.state == 'R'
    }
}

/// List the threads of the current process
///
/// Threads that exit between the directory scan and the `stat` read are
/// skipped.
pub fn list_tasks() -> io::Result<Vec<TaskInfo>> {
    let mut tasks = Vec::new();
    for entry in fs::read_dir(TASK_DIR)? {
        let entry = entry?;
        let Some(raw) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(task) = parse_stat(Tid::new(raw), &stat) {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

/// Parse `tid (comm) S ...`; `comm` may itself contain spaces and parens
fn parse_stat(tid: Tid, stat: &str) -> Option<TaskInfo> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    if close <= open {
        return None;
    }
    let name = stat[open + 1..close].to_string();
    let state = stat[close + 1..].trim_start().chars().next()?;
    Some(TaskInfo { tid, state, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_simple() {
        let task = parse_stat(Tid::new(42), "42 (worker) R 1 2 3").unwrap();
        assert_eq!(task.name, "worker");
        assert_eq!(task.state, 'R');
        assert!(task.is_running());
    }

    #[test]
    fn test_parse_stat_tricky_comm() {
        let task = parse_stat(Tid::new(7), "7 (a (b) c) S 1 2").unwrap();
        assert_eq!(task.name, "a (b) c");
        assert_eq!(task.state, 'S');
    }

    #[test]
    fn test_parse_stat_garbage() {
        assert!(parse_stat(Tid::new(1), "nonsense").is_none());
        assert!(parse_stat(Tid::new(1), "1 (x)").is_none());
    }

    #[test]
    fn test_list_includes_calling_thread() {
        let me = Tid::current();
        let tasks = list_tasks().unwrap();
        assert!(tasks.iter().any(|t| t.tid == me));
    }
}

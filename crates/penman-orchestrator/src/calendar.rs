use penman_core::{CalendarEntry, NewTask, PenmanResult, TaskKind};

/// Turn the first `limit` calendar entries into `write` tasks.
///
/// The entry itself becomes the task payload, so the generator sees the
/// keyword, format and target date.
pub fn calendar_tasks(
    agent_id: &str,
    entries: &[CalendarEntry],
    limit: usize,
) -> PenmanResult<Vec<NewTask>> {
    entries
        .iter()
        .take(limit)
        .map(|entry| {
            Ok(NewTask::new(agent_id, serde_json::to_value(entry)?)
                .with_kind(TaskKind::Write)
                .with_priority(entry.priority))
        })
        .collect()
}

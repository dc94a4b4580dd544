/*
[INPUT]:  TaskView snapshot published by the reconciler
[OUTPUT]: Plain-text block for the terminal
[POS]:    Presentation layer - CLI rendering only
[UPDATE]: When the exposed task record gains fields worth showing
*/

use crate::tracker::{Progress, TaskView, TrackedStatus, TrackedTask};

const BAR_WIDTH: usize = 20;

pub fn render_view(view: &TaskView) -> String {
    let Some(study_id) = view.study_id.as_deref() else {
        return "No active study".to_string();
    };

    let mut out = format!("Study {study_id}\n");
    if view.tasks.is_empty() {
        out.push_str("  no blocking tasks\n");
        return out;
    }

    for task in &view.tasks {
        out.push_str(&render_task(task));
        out.push('\n');
    }

    if view.has_unresolved {
        out.push_str("  waiting for tasks to finish...\n");
    } else {
        out.push_str("  all tasks resolved; press Enter to dismiss\n");
    }
    out
}

fn render_task(task: &TrackedTask) -> String {
    let line = format!(
        "  {} | {} | {} | {}",
        task.id,
        task.task_type,
        status_label(task.status),
        progress_bar(task.progress)
    );
    match &task.error {
        Some(error) => format!("{line} | error: {error}"),
        None => line,
    }
}

fn status_label(status: TrackedStatus) -> &'static str {
    match status {
        TrackedStatus::Pending => "pending",
        TrackedStatus::Running => "running",
        TrackedStatus::Completed => "completed",
        TrackedStatus::Failed => "failed",
    }
}

fn progress_bar(progress: Progress) -> String {
    match progress {
        Progress::Indeterminate => format!("[{}] --%", "~".repeat(BAR_WIDTH)),
        Progress::Percent(percent) => {
            let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
            format!(
                "[{}{}] {:>3}%",
                "#".repeat(filled),
                " ".repeat(BAR_WIDTH - filled),
                percent
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwatch_adapter::TaskType;

    fn task(id: &str, status: TrackedStatus, progress: Progress) -> TrackedTask {
        TrackedTask {
            id: id.to_string(),
            task_type: TaskType::UpgradeStudy,
            status,
            progress,
            error: None,
        }
    }

    #[test]
    fn inactive_view() {
        assert_eq!(render_view(&TaskView::default()), "No active study");
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(Progress::Percent(50)), format!("[{}{}]  50%", "#".repeat(10), " ".repeat(10)));
        assert_eq!(progress_bar(Progress::COMPLETE), format!("[{}] 100%", "#".repeat(20)));
        assert!(progress_bar(Progress::Indeterminate).ends_with("--%"));
    }

    #[test]
    fn unresolved_view_has_no_dismiss_hint() {
        let view = TaskView {
            study_id: Some("S".into()),
            tasks: vec![task("A", TrackedStatus::Running, Progress::Percent(40))],
            has_unresolved: true,
        };
        let text = render_view(&view);
        assert!(text.starts_with("Study S\n"));
        assert!(text.contains("A | UPGRADE_STUDY | running"));
        assert!(!text.contains("press Enter"));
    }

    #[test]
    fn resolved_view_shows_error_and_hint() {
        let mut failed = task("B", TrackedStatus::Failed, Progress::Indeterminate);
        failed.error = Some("disk full".into());
        let view = TaskView {
            study_id: Some("S".into()),
            tasks: vec![failed],
            has_unresolved: false,
        };
        let text = render_view(&view);
        assert!(text.contains("failed"));
        assert!(text.contains("error: disk full"));
        assert!(text.contains("press Enter to dismiss"));
    }
}

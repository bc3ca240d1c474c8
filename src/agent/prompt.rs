//! Task descriptions handed to workers.

use std::fmt::Write;

use crate::backlog::{Backlog, Story};

/// Commit subject a worker is asked to use; completion detection greps for the id.
pub fn completion_commit_subject(story: &Story) -> String {
    format!("feat: {} - {}", story.id, story.title)
}

/// Task description for one story, built from the current backlog state.
///
/// Includes live progress counters so a worker resumed after a partial
/// batch sees up-to-date context.
pub fn task_description(backlog: &Backlog, story: &Story) -> String {
    let completed = backlog.completed_count();
    let total = backlog.stories.len();

    let mut out = String::new();
    if !backlog.project.is_empty() {
        let _ = writeln!(out, "# Project: {}", backlog.project);
    }
    if !backlog.description.is_empty() {
        let _ = writeln!(out, "{}", backlog.description);
    }
    let _ = writeln!(out, "\nProgress: {} of {} stories complete.", completed, total);

    let _ = writeln!(out, "\n## Story {}: {}", story.id, story.title);
    if !story.description.is_empty() {
        let _ = writeln!(out, "\n{}", story.description);
    }
    if !story.acceptance_criteria.is_empty() {
        let _ = writeln!(out, "\n### Acceptance criteria");
        for criterion in &story.acceptance_criteria {
            let _ = writeln!(out, "- {}", criterion);
        }
    }
    if !story.notes.is_empty() {
        let _ = writeln!(out, "\n### Notes\n{}", story.notes);
    }

    let _ = writeln!(
        out,
        "\n## Instructions\n\
         Work only on this story, in the current directory.\n\
         When every acceptance criterion is met, commit all changes with the message:\n\
         \n    {}\n\
         \nThe story id must appear in the commit message; work is only picked up once it does.",
        completion_commit_subject(story)
    );
    out
}

/// Instructions for resolving a conflicted merge of `branch` into the trunk.
pub fn conflict_resolution_prompt(branch: &str, story: &Story, trunk: &str) -> String {
    format!(
        "A merge of branch `{branch}` into `{trunk}` stopped with conflicts.\n\
         The branch implements story {id}: {title}.\n\n\
         Resolve every conflicted file so that both the work already on `{trunk}` and the \
         work from story {id} are preserved. Remove all conflict markers, stage the \
         resolved files with `git add`, and conclude the merge with `git commit --no-edit`.\n\
         Do not abort the merge and do not switch branches.",
        branch = branch,
        trunk = trunk,
        id = story.id,
        title = story.title,
    )
}

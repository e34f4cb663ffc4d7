//! Checklist Engine (C13, §4.12) — a persistent, prioritized task list with
//! markdown briefing generation and plan-sync parsing.

use chrono::Utc;
use regex::Regex;

use crate::error::Result;
use crate::metadata::{checklist as store, Storage};
use crate::types::{new_id, ChecklistItem, ChecklistScope, ChecklistStatus};

pub struct ChecklistEngine {
    storage: Storage,
}

impl ChecklistEngine {
    pub fn new(storage: Storage) -> Self {
        ChecklistEngine { storage }
    }

    pub fn create(
        &self,
        project_id: &str,
        content: &str,
        scope: ChecklistScope,
        priority: u8,
        tags: Vec<String>,
    ) -> Result<ChecklistItem> {
        let now = Utc::now();
        let item = ChecklistItem {
            id: new_id(),
            project_id: project_id.to_string(),
            content: content.to_string(),
            status: ChecklistStatus::Open,
            scope,
            priority,
            tags,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: None,
        };
        self.storage.with_connection(|conn| store::insert(conn, &item))?;
        Ok(item)
    }

    pub fn update(&self, id: &str, status: Option<ChecklistStatus>, priority: Option<u8>) -> Result<bool> {
        self.storage
            .with_connection(|conn| store::update(conn, id, status, priority, Utc::now()))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        self.storage.with_connection(|conn| store::delete(conn, id))
    }

    pub fn list(&self, project_id: &str, include_done: bool) -> Result<Vec<ChecklistItem>> {
        self.storage.with_connection(|conn| store::list(conn, project_id, include_done))
    }

    /// Stable 8-char short id derived from the item's full id, used as the
    /// `(ma:<prefix>)` back-reference token in briefings and plan files.
    pub fn short_id(item: &ChecklistItem) -> String {
        item.id.chars().filter(|c| *c != '-').take(8).collect()
    }

    /// Render the top-N open items (ordered by priority asc, then created_at
    /// asc) as a markdown briefing digest.
    pub fn briefing(&self, project_id: &str, top_n: usize) -> Result<String> {
        let mut items = self.list(project_id, false)?;
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        items.truncate(top_n);

        let mut out = String::from("# Open Checklist Items\n\n");
        if items.is_empty() {
            out.push_str("_nothing open_\n");
            return Ok(out);
        }
        for item in &items {
            out.push_str(&format!(
                "- [ ] {} (ma:{})\n",
                item.content,
                Self::short_id(item)
            ));
        }
        Ok(out)
    }

    /// Parse a markdown plan file's `[x]`/`[ ]` lines with `(ma:<prefix>)`
    /// back-references and apply the completion state to matching items.
    /// Whitespace and case around the marker are tolerated; lines whose
    /// reference doesn't match any known item are ignored rather than
    /// erroring, since a plan may reference items from other projects.
    pub fn sync_from_plan(&self, project_id: &str, plan_text: &str) -> Result<usize> {
        let line_re = Regex::new(r"(?i)^\s*[-*]\s*\[( |x)\]\s*.*\(ma:\s*([a-z0-9]{4,8})\s*\)\s*$").unwrap();
        let items = self.list(project_id, true)?;
        let mut applied = 0;

        for line in plan_text.lines() {
            let Some(caps) = line_re.captures(line) else { continue };
            let checked = caps[1].eq_ignore_ascii_case("x");
            let prefix = caps[2].to_lowercase();

            let Some(item) = items.iter().find(|i| Self::short_id(i).to_lowercase().starts_with(&prefix)) else {
                continue;
            };

            let target_status = if checked { ChecklistStatus::Done } else { ChecklistStatus::Open };
            if item.status != target_status {
                self.update(&item.id, Some(target_status), None)?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ChecklistEngine {
        ChecklistEngine::new(Storage::open_in_memory().unwrap())
    }

    #[test]
    fn briefing_orders_by_priority_then_age() {
        let eng = engine();
        eng.create("p1", "low priority task", ChecklistScope::Project, 9, vec![]).unwrap();
        eng.create("p1", "urgent task", ChecklistScope::Project, 1, vec![]).unwrap();

        let brief = eng.briefing("p1", 10).unwrap();
        let urgent_pos = brief.find("urgent task").unwrap();
        let low_pos = brief.find("low priority task").unwrap();
        assert!(urgent_pos < low_pos);
    }

    #[test]
    fn sync_from_plan_marks_done_by_reference() {
        let eng = engine();
        let item = eng.create("p1", "write tests", ChecklistScope::Project, 1, vec![]).unwrap();
        let short = ChecklistEngine::short_id(&item);

        let plan = format!("- [x] write tests (ma:{short})\n- [ ] unrelated line\n");
        let applied = eng.sync_from_plan("p1", &plan).unwrap();
        assert_eq!(applied, 1);

        let fetched = eng.list("p1", true).unwrap().into_iter().find(|i| i.id == item.id).unwrap();
        assert_eq!(fetched.status, ChecklistStatus::Done);
    }

    #[test]
    fn sync_from_plan_ignores_unmatched_references() {
        let eng = engine();
        eng.create("p1", "write tests", ChecklistScope::Project, 1, vec![]).unwrap();
        let applied = eng.sync_from_plan("p1", "- [x] something (ma:zzzzzzzz)\n").unwrap();
        assert_eq!(applied, 0);
    }
}

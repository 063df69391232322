//! Query-template substitution.

use reportscope_core_types::WorkItem;

/// Substitutes every placeholder occurrence with the work item's identifier.
/// Both spellings are honored because the bundled templates historically used
/// either.
pub fn fill_template(template: &str, item: &WorkItem) -> String {
    template
        .replace("[report_id]", item.as_str())
        .replace("[reportId]", item.as_str())
}

//! Tabular summary of a finished run.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use spacesync_core::push::PushReport;

/// One row per push step that did any work.
pub fn push_table(report: &PushReport) -> Option<Table> {
    let steps: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.succeeded + s.failed > 0)
        .collect();
    if steps.is_empty() {
        return None;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Stage", "Step", "Succeeded", "Failed"]);

    for step in steps {
        let failed = if step.failed > 0 {
            Cell::new(step.failed).fg(Color::Red)
        } else {
            Cell::new(step.failed)
        };
        table.add_row(vec![
            Cell::new(step.stage),
            Cell::new(step.step.replace('_', " ")),
            Cell::new(step.succeeded).fg(Color::Green),
            failed,
        ]);
    }
    Some(table)
}

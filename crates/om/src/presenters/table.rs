use comfy_table::{Cell, Color, ContentArrangement, Table};

/// Render `rows` under cyan `headers`. The result ends with a newline.
#[must_use]
pub fn render_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    for row in rows {
        table.add_row(row);
    }
    format!("{table}\n")
}

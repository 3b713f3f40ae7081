// Fixed-width console table rendering for the list command.

/// Render rows as an aligned table: headers, an `=` separator line, then
/// one line per row. Column widths fit the widest cell. Rows are printed
/// in the order given; callers sort first.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.len());
        }
    }

    let mut out = String::new();
    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| format!("{:<1$}", header, width + 1))
        .collect();
    out.push_str(&header_line.join("  "));
    out.push('\n');

    let separator: Vec<String> = widths.iter().map(|width| "=".repeat(width + 1)).collect();
    out.push_str(&separator.join("  "));
    out.push('\n');

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<1$}", value, width + 1))
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    out
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

use serde::Serialize;
use std::io::{self, Write};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    write_table(&mut io::stdout().lock(), headers, rows)
}

fn write_table(out: &mut impl Write, headers: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain([headers[col].len()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:w$}"))
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    writeln!(out, "{}", line(headers.to_vec()))?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", rule.join("  "))?;
    for row in rows {
        writeln!(out, "{}", line(row.iter().map(String::as_str).collect()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_padded_to_widest_cell() {
        let mut out = Vec::new();
        let rows = vec![
            vec!["store".to_string(), "tries_deliver".to_string()],
            vec!["discard".to_string(), "".to_string()],
        ];
        write_table(&mut out, &["NAME", "FLAGS"], &rows).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "NAME     FLAGS\n-------  -------------\nstore    tries_deliver\ndiscard\n"
        );
    }
}

//! Plain-text and JSON displayers (spec.md §6's `-o console` / `-o json`).

use crate::collector::{Align, Cell};

use super::Displayer;

/// One-shot plain-text renderer: each panel/table becomes a line (or a
/// small block of lines) written straight to the given sink, no color.
pub struct ConsoleDisplayer<W: std::io::Write> {
    out: W,
}

impl<W: std::io::Write> ConsoleDisplayer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: std::io::Write> Displayer for ConsoleDisplayer<W> {
    fn emit_panel(&mut self, name: &str, cells: &[Cell], _align: Align) {
        let line: Vec<String> = cells
            .iter()
            .map(|c| match c.header {
                Some(h) => format!("{h}={}", c.value),
                None => c.value.clone(),
            })
            .collect();
        let _ = writeln!(self.out, "{name}: {}", line.join(" "));
    }

    fn emit_table(&mut self, name: &str, headers: &[&str], rows: &[Vec<Cell>]) {
        let _ = writeln!(self.out, "{name}:");
        let _ = writeln!(self.out, "  {}", headers.join("\t"));
        for row in rows {
            let line: Vec<&str> = row.iter().map(|c| c.value.as_str()).collect();
            let _ = writeln!(self.out, "  {}", line.join("\t"));
        }
    }

    fn emit_prefix(&mut self, text: &str) {
        let _ = write!(self.out, "{}", text.trim_end_matches('\n'));
        let _ = writeln!(self.out);
    }
}

/// Renders one JSON object per tick: `{"panels": {...}, "tables": {...}}`.
/// Grounded on `serde_json`, the teacher's only structured-row-to-JSON
/// path (`rpglot-web`'s API responses).
pub struct JsonDisplayer<W: std::io::Write> {
    out: W,
    panels: serde_json::Map<String, serde_json::Value>,
    tables: serde_json::Map<String, serde_json::Value>,
    pending_prefix: Option<String>,
}

impl<W: std::io::Write> JsonDisplayer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            panels: serde_json::Map::new(),
            tables: serde_json::Map::new(),
            pending_prefix: None,
        }
    }

    /// Flushes the accumulated tick as a single JSON line and clears state
    /// for the next tick.
    pub fn flush_tick(&mut self) {
        let doc = serde_json::json!({
            "panels": serde_json::Value::Object(std::mem::take(&mut self.panels)),
            "tables": serde_json::Value::Object(std::mem::take(&mut self.tables)),
        });
        let _ = writeln!(self.out, "{doc}");
    }
}

impl<W: std::io::Write> Displayer for JsonDisplayer<W> {
    fn emit_panel(&mut self, name: &str, cells: &[Cell], _align: Align) {
        let mut obj = serde_json::Map::new();
        for cell in cells {
            if let Some(h) = cell.header {
                obj.insert(h.to_string(), serde_json::Value::String(cell.value.clone()));
            }
        }
        self.panels
            .insert(name.to_string(), serde_json::Value::Object(obj));
    }

    fn emit_table(&mut self, name: &str, headers: &[&str], rows: &[Vec<Cell>]) {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut obj = serde_json::Map::new();
                for (h, cell) in headers.iter().zip(row) {
                    obj.insert(
                        h.to_string(),
                        serde_json::Value::String(cell.value.clone()),
                    );
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        let entry = serde_json::json!({
            "prefix": self.pending_prefix.take(),
            "rows": rows,
        });
        self.tables.insert(name.to_string(), entry);
    }

    fn emit_prefix(&mut self, text: &str) {
        self.pending_prefix = Some(text.trim_end_matches('\n').to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{HeaderPlacement, Status};

    #[test]
    fn console_emits_key_value_panel() {
        let mut buf = Vec::new();
        {
            let mut d = ConsoleDisplayer::new(&mut buf);
            d.emit_panel(
                "host",
                &[Cell {
                    value: "0.50".into(),
                    header: Some("load1"),
                    header_placement: HeaderPlacement::Inline,
                    status: Status::Ok,
                }],
                Align::Left,
            );
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "host: load1=0.50\n");
    }

    #[test]
    fn json_flushes_panel_and_table() {
        let mut buf = Vec::new();
        {
            let mut d = JsonDisplayer::new(&mut buf);
            d.emit_panel(
                "host",
                &[Cell {
                    value: "0.50".into(),
                    header: Some("load1"),
                    header_placement: HeaderPlacement::Inline,
                    status: Status::Ok,
                }],
                Align::Left,
            );
            d.flush_tick();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"load1\":\"0.50\""));
    }
}

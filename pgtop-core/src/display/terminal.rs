//! ratatui-backed curses-equivalent displayer (spec.md §4.8/§6's `-o
//! curses`, the default). Grounded on the flat package's `tui/render.rs`
//! for the status-to-color mapping and `tui/table.rs` for column-width
//! handling, generalized to drive off `Cell`/`fit_columns`/`truncate_middle`
//! instead of bespoke widget state per table.

use ratatui::layout::{Alignment, Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row as TuiRow, Table};
use ratatui::Frame;

use crate::collector::{Align, Cell, Status};

use super::{fit_columns, truncate_middle, Displayer};

const MAX_COLUMN_WIDTH: usize = 32;
/// Reserved for the per-row off-screen-column indicator character, per
/// spec.md §4.8: when width negotiation drops a column, a row that would
/// have shown a non-Ok cell there still surfaces that severity at the
/// row's edge instead of silently disappearing.
const INDICATOR_WIDTH: usize = 1;

fn status_color(status: Status) -> Color {
    match status {
        Status::Ok => Color::Reset,
        Status::Warning => Color::Yellow,
        Status::Critical => Color::Red,
    }
}

fn cell_span(cell: &Cell) -> Span<'_> {
    let mut style = Style::default().fg(status_color(cell.status));
    if cell.status == Status::Critical {
        style = style.add_modifier(Modifier::BOLD);
    }
    Span::styled(cell.value.clone(), style)
}

/// One togglable UI flag shown in the bottom menu bar, per spec.md §4.9's
/// keyboard handling (`s`/`f`/`u`/`a`/`t`/`r`/`h`).
pub struct MenuItem {
    pub key: char,
    pub label: &'static str,
    pub active: bool,
}

/// Accumulates panels/tables for one tick and draws them into a single
/// `Frame` split top-to-bottom, matching the flat package's multi-panel
/// `tui/app.rs` layout (summary panels stacked above the process table).
pub struct TerminalDisplayer<'f, 'b> {
    frame: &'f mut Frame<'b>,
    next_y: u16,
    area: Rect,
}

impl<'f, 'b> TerminalDisplayer<'f, 'b> {
    pub fn new(frame: &'f mut Frame<'b>, area: Rect) -> Self {
        Self {
            frame,
            next_y: area.y,
            area,
        }
    }

    fn take_rows(&mut self, rows: u16) -> Rect {
        let rect = Rect {
            x: self.area.x,
            y: self.next_y,
            width: self.area.width,
            height: rows.min(self.area.y + self.area.height - self.next_y),
        };
        self.next_y = (self.next_y + rows).min(self.area.y + self.area.height);
        rect
    }

    /// Draws the top-right clock, per spec.md §4.8's chrome. Takes one row
    /// at the displayer's current cursor, right-aligned.
    pub fn draw_clock(&mut self, time_str: &str) {
        let area = Rect {
            x: self.area.x,
            y: self.area.y,
            width: self.area.width,
            height: 1,
        };
        let para = Paragraph::new(Line::from(Span::raw(time_str.to_string())))
            .alignment(Alignment::Right);
        self.frame.render_widget(para, area);
    }

    /// Draws the bottom menu bar listing each toggle key, highlighting the
    /// ones currently active, per spec.md §4.9.
    pub fn draw_menu_bar(&mut self, items: &[MenuItem]) {
        let area = Rect {
            x: self.area.x,
            y: self.area.y + self.area.height.saturating_sub(1),
            width: self.area.width,
            height: 1,
        };
        let mut spans = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                spans.push(Span::raw(" "));
            }
            let style = if item.active {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            spans.push(Span::styled(format!("{}:{}", item.key, item.label), style));
        }
        let para = Paragraph::new(Line::from(spans));
        self.frame.render_widget(para, area);
    }
}

impl<'f, 'b> Displayer for TerminalDisplayer<'f, 'b> {
    fn emit_prefix(&mut self, text: &str) {
        let area = self.take_rows(1);
        let line = text.trim_end_matches('\n');
        let para = Paragraph::new(Line::from(Span::styled(
            line.to_string(),
            Style::default().add_modifier(Modifier::REVERSED),
        )));
        self.frame.render_widget(para, area);
    }

    fn emit_panel(&mut self, name: &str, cells: &[Cell], align: Align) {
        let area = self.take_rows(1);
        let mut spans = vec![Span::raw(format!("{name}: "))];
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                spans.push(Span::raw("  "));
            }
            if let Some(h) = cell.header {
                spans.push(Span::raw(format!("{h}=")));
            }
            spans.push(cell_span(cell));
        }
        let alignment = match align {
            Align::Left => Alignment::Left,
            Align::Right => Alignment::Right,
        };
        let para = Paragraph::new(Line::from(spans)).alignment(alignment);
        self.frame.render_widget(para, area);
    }

    fn emit_table(&mut self, name: &str, headers: &[&str], rows: &[Vec<Cell>]) {
        // Natural width per column: longer of header and widest cell,
        // capped so one runaway value (a long query string) can't push
        // every other column off screen.
        let natural_widths: Vec<usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let w = rows
                    .iter()
                    .map(|r| r.get(i).map(Cell::display_len).unwrap_or(0))
                    .chain(std::iter::once(h.len()))
                    .max()
                    .unwrap_or(h.len());
                w.min(MAX_COLUMN_WIDTH)
            })
            .collect();

        // First column is the row's identity (pid, cluster); never hidden.
        let widths_with_flags: Vec<(usize, bool)> = natural_widths
            .iter()
            .enumerate()
            .map(|(i, &w)| (w, i == 0))
            .collect();
        let budget = (self.area.width as usize).saturating_sub(INDICATOR_WIDTH + 1);
        let visible = fit_columns(&widths_with_flags, budget);

        let area = self.take_rows((rows.len() as u16 + 3).min(self.area.height));

        let visible_headers: Vec<String> = headers
            .iter()
            .zip(&visible)
            .filter(|(_, &v)| v)
            .map(|(h, _)| h.to_string())
            .collect();
        let mut header_cells = visible_headers;
        header_cells.push(" ".to_string());
        let header_row = TuiRow::new(header_cells);

        let table_rows: Vec<TuiRow> = rows
            .iter()
            .map(|row| {
                let mut worst_hidden = Status::Ok;
                let mut spans: Vec<Span> = Vec::new();
                for (i, (cell, &is_visible)) in row.iter().zip(&visible).enumerate() {
                    if is_visible {
                        let width = natural_widths.get(i).copied().unwrap_or(20);
                        let text = truncate_middle(&cell.value, width);
                        spans.push(Span::styled(text, Style::default().fg(status_color(cell.status))));
                    } else if cell.status > worst_hidden {
                        worst_hidden = cell.status;
                    }
                }
                let indicator = match worst_hidden {
                    Status::Critical => Span::styled("!", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
                    Status::Warning => Span::styled("*", Style::default().fg(Color::Yellow)),
                    Status::Ok => Span::raw(" "),
                };
                spans.push(indicator);
                TuiRow::new(spans)
            })
            .collect();

        let mut widths_constraints: Vec<Constraint> = natural_widths
            .iter()
            .zip(&visible)
            .filter(|(_, &v)| v)
            .map(|(w, _)| Constraint::Length(*w as u16 + 1))
            .collect();
        widths_constraints.push(Constraint::Length(INDICATOR_WIDTH as u16));

        let table = Table::new(table_rows, widths_constraints)
            .header(header_row)
            .block(Block::default().borders(Borders::TOP).title(name.to_string()));
        self.frame.render_widget(table, area);
    }
}

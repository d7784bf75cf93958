//! Terminal browser over the configuration document.
//!
//! The browser is a thin shell: it renders outline rows and routes key
//! presses to session operations. Every error a command returns is shown
//! in the status line; nothing fails silently.

use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Paragraph, Widget},
    DefaultTerminal, Frame,
};

use crate::outline::{outline, NodeKind, OutlineRow};
use crate::session::Session;
use crate::topology::Direction;

pub struct Browser {
    session: Session,
    rows: Vec<OutlineRow>,
    selected: usize,
    status: String,
    confirm_quit: bool,
    exit: bool,
}

impl Browser {
    pub fn new(session: Session, hardware_changed: bool) -> Self {
        let rows = outline(session.document());
        let status = if hardware_changed {
            "Hardware setup was changed.".to_string()
        } else {
            "READY".to_string()
        };
        Self {
            session,
            rows,
            selected: 0,
            status,
            confirm_quit: false,
            exit: false,
        }
    }

    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        while !self.exit {
            terminal.draw(|f| self.draw(f))?;
            self.handle_events()?;
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> Result<()> {
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        let confirm_pending = self.confirm_quit;
        self.confirm_quit = false;
        match key_event.code {
            KeyCode::Char('q') => {
                if self.session.is_dirty() && !confirm_pending {
                    self.status =
                        "There are unsaved changes. Press q again to quit anyway.".to_string();
                    self.confirm_quit = true;
                } else {
                    self.exit = true;
                }
            }
            KeyCode::Char('s') => match self.session.save() {
                Ok(()) => self.status = "Configuration saved.".to_string(),
                Err(err) => self.status = err.to_string(),
            },
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.rows.len() {
                    self.selected += 1;
                }
            }
            KeyCode::PageUp => self.selected = self.selected.saturating_sub(20),
            KeyCode::PageDown => {
                self.selected = (self.selected + 20).min(self.rows.len().saturating_sub(1));
            }
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = self.rows.len().saturating_sub(1),
            KeyCode::Char('u') => self.device_op(|session, n| {
                session
                    .move_device(n, Direction::Up)
                    .map(|()| "Device entry moved up.")
            }),
            KeyCode::Char('d') => self.device_op(|session, n| {
                session
                    .move_device(n, Direction::Down)
                    .map(|()| "Device entry moved down.")
            }),
            KeyCode::Char('x') => self.device_op(|session, n| {
                session.delete_device(n).map(|()| "Device entry deleted.")
            }),
            _ => {}
        }
    }

    /// Runs a device-entry operation on the current selection. Selecting
    /// anything that is not a device entry is a node-type error, like the
    /// original tool's context menu.
    fn device_op(
        &mut self,
        op: impl FnOnce(&mut Session, u32) -> crate::error::Result<&'static str>,
    ) {
        let target = self
            .rows
            .get(self.selected)
            .and_then(|row| row.device_number)
            .ok_or(crate::error::ConfigError::UnsupportedForNodeType);
        match target.and_then(|n| op(&mut self.session, n)) {
            Ok(message) => {
                self.status = message.to_string();
                self.rows = outline(self.session.document());
                if self.selected >= self.rows.len() {
                    self.selected = self.rows.len().saturating_sub(1);
                }
            }
            Err(err) => self.status = err.to_string(),
        }
    }
}

impl Widget for &Browser {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(" ME-iDS Intelligent Device Configuration ".bold());
        let instructions = Line::from(vec![
            " Save ".into(),
            "<S>".blue().bold(),
            " Move ".into(),
            "<U>/<D>".blue().bold(),
            " Delete ".into(),
            "<X>".blue().bold(),
            " Quit ".into(),
            "<Q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);
        let inner = block.inner(area);
        block.render(area, buf);

        if inner.height < 2 {
            return;
        }
        let view_height = (inner.height - 1) as usize;
        let top = if self.selected >= view_height {
            self.selected + 1 - view_height
        } else {
            0
        };

        let mut lines = Vec::with_capacity(view_height + 1);
        for (i, row) in self.rows.iter().enumerate().skip(top).take(view_height) {
            let mut spans: Vec<Span> = Vec::new();
            spans.push("  ".repeat(row.depth).into());
            spans.push(marker(row).into());
            let label = format!("{:<32}", row.label);
            spans.push(if i == self.selected {
                label.black().on_white()
            } else {
                label.into()
            });
            if !row.value.is_empty() {
                spans.push("  ".into());
                spans.push(row.value.clone().yellow());
            }
            lines.push(Line::from(spans));
        }

        let dirty = if self.session.is_dirty() {
            " [modified]"
        } else {
            ""
        };
        lines.push(Line::from(vec![
            self.status.clone().into(),
            dirty.magenta().bold(),
        ]));

        Paragraph::new(lines).render(inner, buf);
    }
}

fn marker(row: &OutlineRow) -> &'static str {
    match row.kind {
        NodeKind::DeviceEntry => match (row.plugged, row.remote) {
            (true, false) => "[+] ",
            (false, false) => "[-] ",
            (true, true) => "[R] ",
            (false, true) => "[r] ",
        },
        NodeKind::SubdeviceEntry if row.locked => "(L) ",
        NodeKind::Mux32m | NodeKind::Demux32 if row.timed => "(T) ",
        _ => "",
    }
}

/// Runs the browser on the terminal, restoring it afterwards.
pub fn run(session: Session, hardware_changed: bool) -> Result<()> {
    let mut terminal = ratatui::init();
    let result = Browser::new(session, hardware_changed).run(&mut terminal);
    ratatui::restore();
    result
}

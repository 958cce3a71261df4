//! The dashboard itself: panel layout, drawing, and the input loop that keeps
//! it on screen until the user quits.

use crate::{config::Units, raster::Raster, weather::WeatherSnapshot};
use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
use log::{debug, error, info, trace};
use ratatui::{
    buffer::Buffer,
    crossterm::event::{
        self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
    },
    layout::{Alignment, Constraint, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{self, Block, Paragraph, Row, Table, Widget},
    DefaultTerminal, Frame,
};
use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

// Panel positions, as (x, y, width, height) in terminal cells
const ICON_PANEL: Rect = Rect::new(0, 0, 20, 10);
const LOCATION_PANEL: Rect = Rect::new(20, 0, 30, 5);
const SUN_PANEL: Rect = Rect::new(20, 5, 30, 5);
const TEMPERATURE_PANEL: Rect = Rect::new(50, 0, 20, 5);
const WIND_PANEL: Rect = Rect::new(50, 5, 20, 5);
const COMPASS_PANEL: Rect = Rect::new(70, 0, 20, 10);
const INFO_PANEL_Y: u16 = 10;
const INFO_PANEL_HEIGHT: u16 = 4;

/// Everything on screen. All the text is formatted up front, so drawing is
/// just layout.
#[derive(Debug)]
pub struct Dashboard {
    location_title: String,
    location_lines: Vec<String>,
    sun_lines: [String; 2],
    temperature_lines: [String; 3],
    wind_rows: [(&'static str, String); 3],
    conditions_line: String,
    updated: String,
    icon_title: String,
    icon: Raster,
    compass: Option<Raster>,
}

impl Dashboard {
    const QUIT_HINT: &'static str = "Press Q (or ctrl+c) to quit.";

    pub fn new(
        snapshot: &WeatherSnapshot,
        units: Units,
        icon: Raster,
        compass: Option<Raster>,
    ) -> Self {
        let degrees = units.temperature_symbol();
        let speed = units.speed_symbol();
        let main = &snapshot.main;

        let location_title = if snapshot.sys.country.is_empty() {
            snapshot.name.clone()
        } else {
            format!("{}, {}", snapshot.name, snapshot.sys.country)
        };
        let location_lines = vec![
            format!(
                "{}, {}",
                snapshot.condition.main, snapshot.condition.description
            ),
            format!(
                "Lat: {:.4}, Lon: {:.4}",
                snapshot.coord.lat, snapshot.coord.lon
            ),
            format!(
                "Temp: {:.2}{degrees} (feels {:.2})",
                main.temp, main.feels_like
            ),
        ];

        let dashboard = Self {
            location_title,
            location_lines,
            sun_lines: [
                format!("Sunrise   {}", clock_time(snapshot.sunrise())),
                format!("Sunset    {}", clock_time(snapshot.sunset())),
            ],
            temperature_lines: [
                format!("Max {:.2}{degrees}", main.temp_max),
                format!("Temp {:.2}{degrees}", main.temp),
                format!("Min {:.2}{degrees}", main.temp_min),
            ],
            wind_rows: [
                ("Speed", format!("{:.2} {speed}", snapshot.wind.speed)),
                ("Degrees", format!("{:.0}", snapshot.wind.deg)),
                ("Gusts", format!("{:.2} {speed}", snapshot.wind.gust)),
            ],
            conditions_line: format!(
                "Humidity {}%  Pressure {} hPa  \
                Clouds {}%  Visibility {:.1} km",
                main.humidity,
                main.pressure,
                snapshot.clouds.all,
                f64::from(snapshot.visibility) / 1000.0
            ),
            updated: clock_time(snapshot.observed()),
            icon_title: snapshot.condition.main.clone(),
            icon,
            compass,
        };
        debug!("Built dashboard: {dashboard:?}");
        dashboard
    }

    /// Lay out every panel. Panels that hang off the edge of a small terminal
    /// get clipped.
    pub fn draw(&self, frame: &mut Frame) {
        let screen = frame.area();
        let clip = |rect: Rect| rect.intersection(screen);

        draw_raster(frame, clip(ICON_PANEL), &self.icon_title, &self.icon);

        frame.render_widget(
            Paragraph::new(
                self.location_lines
                    .iter()
                    .map(|line| Line::raw(line.as_str()))
                    .collect::<Vec<_>>(),
            )
            .block(
                Block::bordered()
                    .title(self.location_title.as_str())
                    .title_style(Style::new().yellow()),
            ),
            clip(LOCATION_PANEL),
        );

        frame.render_widget(
            Paragraph::new(
                self.sun_lines
                    .iter()
                    .map(|line| Line::raw(line.as_str()))
                    .collect::<Vec<_>>(),
            )
            .block(Block::bordered().title("Sunrise / Sunset")),
            clip(SUN_PANEL),
        );

        let [max, temp, min] = &self.temperature_lines;
        frame.render_widget(
            Paragraph::new(vec![
                Line::styled(max.as_str(), Style::new().red()),
                Line::raw(temp.as_str()),
                Line::styled(min.as_str(), Style::new().blue()),
            ])
            .alignment(Alignment::Center)
            .block(Block::bordered().title("Temperature")),
            clip(TEMPERATURE_PANEL),
        );

        let rows = self.wind_rows.iter().map(|(label, value)| {
            Row::new([
                widgets::Cell::from(Span::styled(*label, Style::new().cyan())),
                widgets::Cell::from(value.as_str()),
            ])
        });
        frame.render_widget(
            Table::new(rows, [Constraint::Length(8), Constraint::Fill(1)])
                .style(Style::new().blue())
                .block(Block::bordered().title("Wind")),
            clip(WIND_PANEL),
        );

        if let Some(compass) = &self.compass {
            draw_raster(frame, clip(COMPASS_PANEL), "Compass", compass);
        }

        let info_width = if self.compass.is_some() {
            COMPASS_PANEL.right()
        } else {
            WIND_PANEL.right()
        };
        frame.render_widget(
            Paragraph::new(vec![
                Line::raw(self.conditions_line.as_str()),
                Line::from(vec![
                    Span::styled(
                        format!("Updated {}. ", self.updated),
                        Style::new().dark_gray(),
                    ),
                    Span::raw(Self::QUIT_HINT),
                ]),
            ])
            .block(Block::bordered().title("Information")),
            clip(Rect::new(0, INFO_PANEL_Y, info_width, INFO_PANEL_HEIGHT)),
        );
    }
}

/// Format a timestamp as a 12-hour clock time, e.g. `6:05 AM`
fn clock_time(time: Option<DateTime<FixedOffset>>) -> String {
    match time {
        Some(time) => time.format("%-I:%M %p").to_string(),
        None => "--".into(),
    }
}

fn draw_raster(frame: &mut Frame, area: Rect, title: &str, raster: &Raster) {
    let block = Block::bordered().title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(RasterView::new(raster), inner);
}

/// Show a raster in the terminal using upper half blocks: the foreground
/// color is the top pixel and the background is the bottom one, so each cell
/// holds two square-ish pixels. The image is scaled to fit, keeping its aspect
/// ratio, and centered.
pub struct RasterView<'a> {
    raster: &'a Raster,
}

impl<'a> RasterView<'a> {
    const HALF_BLOCK: &'static str = "▀";

    pub fn new(raster: &'a Raster) -> Self {
        Self { raster }
    }
}

impl Widget for RasterView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(fit) = Fit::new(self.raster, area) else {
            return;
        };
        trace!(
            "Drawing {}x{} raster as {fit:?}",
            self.raster.width(),
            self.raster.height()
        );

        for row in 0..fit.rows {
            for column in 0..fit.columns {
                let top = fit.sample(self.raster, column, row * 2);
                let bottom = fit.sample(self.raster, column, row * 2 + 1);
                let position = (
                    area.x + fit.x_offset + column,
                    area.y + fit.y_offset + row,
                );
                if let Some(cell) = buf.cell_mut(position) {
                    cell.set_symbol(Self::HALF_BLOCK)
                        .set_fg(terminal_color(top))
                        .set_bg(terminal_color(bottom));
                }
            }
        }
    }
}

/// How a raster maps onto a block of cells
#[derive(Debug)]
struct Fit {
    /// Output pixels per source pixel
    scale: f64,
    /// Output size, in pixels
    width: u32,
    height: u32,
    /// Output size, in cells
    columns: u16,
    rows: u16,
    x_offset: u16,
    y_offset: u16,
}

impl Fit {
    fn new(raster: &Raster, area: Rect) -> Option<Self> {
        if raster.is_empty() || area.is_empty() {
            return None;
        }
        let scale = f64::min(
            f64::from(area.width) / f64::from(raster.width()),
            f64::from(area.height) * 2.0 / f64::from(raster.height()),
        );
        let width = (f64::from(raster.width()) * scale) as u32;
        let height = (f64::from(raster.height()) * scale) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        // Both fit in the area, which is measured in u16s
        let columns = width as u16;
        let rows = height.div_ceil(2) as u16;
        Some(Self {
            scale,
            width,
            height,
            columns,
            rows,
            x_offset: (area.width - columns) / 2,
            y_offset: (area.height - rows) / 2,
        })
    }

    /// Nearest-neighbor lookup of an output pixel
    fn sample(&self, raster: &Raster, x: u16, y: u16) -> Option<Rgb888> {
        let (x, y) = (u32::from(x), u32::from(y));
        if x >= self.width || y >= self.height {
            return None;
        }
        let source_x =
            ((f64::from(x) / self.scale) as u32).min(raster.width() - 1);
        let source_y =
            ((f64::from(y) / self.scale) as u32).min(raster.height() - 1);
        raster.get(source_x, source_y)
    }
}

fn terminal_color(pixel: Option<Rgb888>) -> Color {
    match pixel {
        Some(color) => Color::Rgb(color.r(), color.g(), color.b()),
        None => Color::Reset,
    }
}

/// Raw mode + alternate screen, for as long as this is alive. Dropping it puts
/// the terminal back the way we found it, regardless of how we're exiting.
pub struct TerminalSession {
    terminal: DefaultTerminal,
}

impl TerminalSession {
    pub fn start() -> anyhow::Result<Self> {
        let terminal =
            ratatui::try_init().context("Error initializing terminal")?;
        info!("Terminal session started");
        Ok(Self { terminal })
    }

    pub fn draw(&mut self, dashboard: &Dashboard) -> anyhow::Result<()> {
        trace!("Drawing dashboard");
        self.terminal
            .draw(|frame| dashboard.draw(frame))
            .context("Error drawing dashboard")?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        match ratatui::try_restore() {
            Ok(()) => info!("Terminal session ended"),
            Err(err) => error!("Error restoring terminal: {err}"),
        }
    }
}

/// Everything the input loop can wake up for
#[derive(Debug)]
enum Input {
    Key(KeyEvent),
    Resize,
    /// SIGINT/SIGTERM
    Interrupt,
    /// The terminal event stream died, nothing else will ever come in
    Closed,
}

/// The single channel every kind of input arrives on
pub struct Inputs {
    sender: Sender<Input>,
    receiver: Receiver<Input>,
}

impl Inputs {
    fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Start catching SIGINT/SIGTERM. Do this before the terminal goes into
    /// raw mode, so a signal can never skip restoring it.
    pub fn listen() -> anyhow::Result<Self> {
        let inputs = Self::new();
        let interrupt_sender = inputs.sender.clone();
        ctrlc::set_handler(move || {
            // If the receiver is gone we're already on our way out
            let _ = interrupt_sender.send(Input::Interrupt);
        })
        .context("Error installing interrupt handler")?;
        Ok(inputs)
    }
}

/// Show the dashboard and block until the user quits
pub fn run(
    session: &mut TerminalSession,
    dashboard: &Dashboard,
    inputs: Inputs,
) -> anyhow::Result<()> {
    let Inputs { sender, receiver } = inputs;
    spawn_input_reader(sender);

    session.draw(dashboard)?;
    wait_for_quit(&receiver, || session.draw(dashboard))
}

/// Forward terminal events onto the channel. The thread is never joined; it
/// dies with the process.
fn spawn_input_reader(sender: Sender<Input>) {
    thread::spawn(move || loop {
        let input = match event::read() {
            Ok(Event::Key(key)) => Input::Key(key),
            Ok(Event::Resize(..)) => Input::Resize,
            Ok(_) => continue,
            Err(err) => {
                error!("Error reading terminal events: {err}");
                Input::Closed
            }
        };
        let closed = matches!(input, Input::Closed);
        if sender.send(input).is_err() || closed {
            break;
        }
    });
}

/// Block on the input channel until something tells us to quit. Redraw
/// whenever the terminal changes size.
fn wait_for_quit(
    receiver: &Receiver<Input>,
    mut redraw: impl FnMut() -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    loop {
        match receiver.recv() {
            Ok(Input::Key(key)) if is_quit(&key) => {
                info!("Quit key pressed");
                return Ok(());
            }
            Ok(Input::Key(key)) => trace!("Ignoring key {key:?}"),
            Ok(Input::Resize) => redraw()?,
            Ok(Input::Interrupt) => {
                info!("Interrupted");
                return Ok(());
            }
            Ok(Input::Closed) | Err(_) => {
                info!("Input closed");
                return Ok(());
            }
        }
    }
}

/// `q` or Ctrl+C. In raw mode Ctrl+C shows up as a key press instead of a
/// signal.
fn is_quit(key: &KeyEvent) -> bool {
    key.kind == KeyEventKind::Press
        && match key.code {
            KeyCode::Char('q' | 'Q') => true,
            KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        }
}

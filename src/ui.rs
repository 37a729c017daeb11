//! egui controls
//!
//! The UI reads a snapshot of application state and returns the actions the
//! user took; the app applies them after the egui pass so nothing is mutated
//! while the UI is being built.

use egui::{Align2, Color32, FontId, Pos2, Rect, RichText, Vec2};

use crate::app::pipeline::DetectorStatus;
use crate::camera::FacingMode;
use crate::detect::FirstSeen;
use crate::render::BeautySettings;
use crate::telemetry::{ConsoleLine, Notice};

const PANEL_WIDTH: f32 = 260.0;
const REC_RED: Color32 = Color32::from_rgb(230, 40, 40);
const BANNER_FILL: Color32 = Color32::from_rgb(140, 30, 30);

/// Everything the UI displays for one frame
pub struct UiState<'a> {
    pub fps: f64,
    pub camera_label: Option<&'a str>,
    pub facing: FacingMode,
    pub can_switch: bool,
    pub beauty: BeautySettings,
    /// Whether the GPU filter compiled
    pub beauty_available: bool,
    pub recording: bool,
    pub timer_text: Option<String>,
    pub detector: &'a DetectorStatus,
    pub first_seen: &'a [FirstSeen],
    pub console: &'a [ConsoleLine],
    pub show_console: bool,
    pub notices: &'a [Notice],
}

/// What the user asked for this frame
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UiActions {
    pub beauty_enabled: Option<bool>,
    pub beauty_strength: Option<u32>,
    pub switch_camera: bool,
    pub toggle_recording: bool,
    pub toggle_console: bool,
    pub clear_console: bool,
    pub dismiss_notices: bool,
    /// Screen area left for the video, in points
    pub video_rect: Option<Rect>,
}

/// Largest rect with the content's aspect ratio centred in `area`
pub fn fit_rect(content: (u32, u32), area: Rect) -> Rect {
    let (w, h) = content;
    if w == 0 || h == 0 || area.width() <= 0.0 || area.height() <= 0.0 {
        return area;
    }
    let scale = (area.width() / w as f32).min(area.height() / h as f32);
    Rect::from_center_size(area.center(), Vec2::new(w as f32 * scale, h as f32 * scale))
}

pub fn draw(ctx: &egui::Context, state: &UiState<'_>) -> UiActions {
    let mut actions = UiActions::default();

    egui::SidePanel::right("controls")
        .resizable(false)
        .exact_width(PANEL_WIDTH)
        .show(ctx, |ui| {
            controls(ui, state, &mut actions);
        });

    if state.show_console {
        egui::TopBottomPanel::bottom("debug_console")
            .resizable(true)
            .default_height(160.0)
            .show(ctx, |ui| {
                console(ui, state.console, &mut actions);
            });
    }

    egui::CentralPanel::default()
        .frame(egui::Frame::default())
        .show(ctx, |ui| {
            let area = ui.max_rect();
            actions.video_rect = Some(area);
            if state.recording {
                recording_indicator(ui, area, state.timer_text.as_deref());
            }
        });

    if !state.notices.is_empty() {
        banners(ctx, state.notices, &mut actions);
    }

    actions
}

fn controls(ui: &mut egui::Ui, state: &UiState<'_>, actions: &mut UiActions) {
    ui.heading("Smart Camera");
    ui.label(format!("FPS: {:.1}", state.fps));
    ui.separator();

    ui.heading("Camera");
    match state.camera_label {
        Some(label) => ui.label(label),
        None => ui.label("No camera"),
    };
    if state.can_switch {
        let target = match state.facing.toggled() {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        };
        if ui.button(format!("Switch to {} camera", target)).clicked() {
            actions.switch_camera = true;
        }
    }
    ui.separator();

    ui.heading("Beauty filter");
    let mut enabled = state.beauty.enabled;
    let checkbox = ui.add_enabled(
        state.beauty_available,
        egui::Checkbox::new(&mut enabled, "Enabled"),
    );
    if checkbox.changed() {
        actions.beauty_enabled = Some(enabled);
    }
    if !state.beauty_available {
        ui.small("Filter unavailable");
    }

    let mut strength = state.beauty.strength_percent();
    let slider = ui.add_enabled(
        state.beauty.enabled && state.beauty_available,
        egui::Slider::new(&mut strength, 0..=100)
            .text("Strength")
            .suffix("%"),
    );
    if slider.changed() {
        actions.beauty_strength = Some(strength);
    }
    ui.separator();

    ui.heading("Recording");
    ui.horizontal(|ui| {
        let label = if state.recording { "Stop" } else { "Record" };
        if ui.button(label).clicked() {
            actions.toggle_recording = true;
        }
        if let Some(timer) = &state.timer_text {
            ui.colored_label(REC_RED, timer);
        }
    });
    ui.separator();

    ui.heading("Detected objects");
    ui.small(state.detector.text());
    egui::ScrollArea::vertical()
        .id_salt("first_seen")
        .max_height(240.0)
        .show(ui, |ui| {
            if state.first_seen.is_empty() {
                ui.label("Nothing yet");
            }
            for entry in state.first_seen {
                ui.label(RichText::new(&entry.label).strong());
                ui.small(entry.time_text());
                ui.add_space(2.0);
            }
        });
    ui.separator();

    let console_label = if state.show_console {
        "Hide debug log"
    } else {
        "Show debug log"
    };
    if ui.button(console_label).clicked() {
        actions.toggle_console = true;
    }
}

fn console(ui: &mut egui::Ui, lines: &[ConsoleLine], actions: &mut UiActions) {
    ui.horizontal(|ui| {
        ui.label(format!("{} lines", lines.len()));
        if ui.button("Clear").clicked() {
            actions.clear_console = true;
        }
    });
    egui::ScrollArea::vertical()
        .id_salt("console_lines")
        .stick_to_bottom(true)
        .auto_shrink([false, false])
        .show(ui, |ui| {
            for line in lines {
                let color = match line.level {
                    tracing::Level::ERROR => Color32::LIGHT_RED,
                    tracing::Level::WARN => Color32::YELLOW,
                    _ => ui.visuals().text_color(),
                };
                ui.label(RichText::new(line.display()).monospace().color(color));
            }
        });
}

fn recording_indicator(ui: &egui::Ui, area: Rect, timer: Option<&str>) {
    let painter = ui.painter();
    let center = Pos2::new(area.left() + 24.0, area.top() + 24.0);
    painter.circle_filled(center, 8.0, REC_RED);
    painter.text(
        Pos2::new(center.x + 16.0, center.y),
        Align2::LEFT_CENTER,
        timer.unwrap_or("REC"),
        FontId::proportional(18.0),
        Color32::WHITE,
    );
}

fn banners(ctx: &egui::Context, notices: &[Notice], actions: &mut UiActions) {
    egui::Area::new(egui::Id::new("error_banners"))
        .anchor(Align2::CENTER_TOP, Vec2::new(-PANEL_WIDTH / 2.0, 12.0))
        .show(ctx, |ui| {
            for notice in notices {
                let response = egui::Frame::popup(ui.style())
                    .fill(BANNER_FILL)
                    .show(ui, |ui| {
                        ui.colored_label(Color32::WHITE, &notice.message);
                    })
                    .response
                    .interact(egui::Sense::click());
                if response.clicked() {
                    actions.dismiss_notices = true;
                }
            }
        });
}

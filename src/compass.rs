//! Wind compass, drawn from scratch for every run. The compass is a ring
//! with the cardinal directions printed just inside it, plus a needle
//! pointing in the direction of the wind bearing.

use crate::{raster::Raster, util::Color};
use embedded_graphics::{
    pixelcolor::Rgb888,
    prelude::{Point, Primitive, Size},
    primitives::{Circle, Line, PrimitiveStyle, Rectangle},
    Drawable,
};
use log::trace;
use std::convert::Infallible;
use u8g2_fonts::{
    fonts,
    types::{FontColor, VerticalPosition},
    FontRenderer,
};

/// Smallest canvas we'll draw on. Below this the labels start crashing into
/// each other.
pub const MIN_SIZE: u32 = 60;
/// Largest canvas we'll draw on. A 1000x1000 raster is already far more than
/// a terminal panel can show.
pub const MAX_SIZE: u32 = 1000;

const LABELS: [(&str, Cardinal); 4] = [
    ("N", Cardinal::North),
    ("E", Cardinal::East),
    ("S", Cardinal::South),
    ("W", Cardinal::West),
];

#[derive(Debug, thiserror::Error)]
pub enum CompassError {
    #[error("Wind bearing must be a finite number of degrees, got {0}")]
    InvalidBearing(f64),
    #[error("Compass doesn't fit on its canvas: {0}")]
    Geometry(String),
    #[error("Error rendering compass label `{label}`: {message}")]
    Label {
        label: &'static str,
        message: String,
    },
}

/// Proxy for the label font, because u8g2 fonts are types rather than values
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LabelFont {
    Small,
    Large,
}

impl LabelFont {
    fn renderer(self) -> FontRenderer {
        match self {
            Self::Small => FontRenderer::new::<fonts::u8g2_font_helvB08_tr>(),
            Self::Large => FontRenderer::new::<fonts::u8g2_font_helvB12_tr>(),
        }
    }

    /// Approximate cap height, used to keep the needle clear of the labels
    fn cap_height(self) -> u32 {
        match self {
            Self::Small => 8,
            Self::Large => 12,
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Cardinal {
    North,
    East,
    South,
    West,
}

/// Everything that decides what the compass looks like. Use
/// [CompassStyle::for_size] to get geometry that fits a canvas, then tweak
/// the colors as needed.
#[derive(Clone, Debug, PartialEq)]
pub struct CompassStyle {
    pub size: Size,
    pub outer_radius: u32,
    pub inner_radius: u32,
    pub outer_color: Color,
    pub inner_color: Color,
    pub label_color: Color,
    pub line_color: Color,
    pub label_font: LabelFont,
    /// Gap between the inner rim and the outside edge of each label
    pub label_inset: u32,
    pub line_width: u32,
    /// How far short of the inner rim the needle stops
    pub line_margin: u32,
    pub draw_line: bool,
}

impl CompassStyle {
    pub const OUTER_COLOR: Color = Color::new(0x3a, 0x7b, 0xd5);
    pub const LINE_COLOR: Color = Color::new(0xe0, 0x3c, 0x31);

    /// Derive geometry that fills a canvas of the given size
    pub fn for_size(size: Size) -> Self {
        let edge = size.width.min(size.height);
        let outer_radius = (edge / 2).saturating_sub(1);
        let ring_width = (edge / 25).max(2);
        let label_font = if edge >= 150 {
            LabelFont::Large
        } else {
            LabelFont::Small
        };
        let label_inset = 2 + edge / 50;

        Self {
            size,
            outer_radius,
            inner_radius: outer_radius.saturating_sub(ring_width),
            outer_color: Self::OUTER_COLOR,
            inner_color: Color::WHITE,
            label_color: Color::BLACK,
            line_color: Self::LINE_COLOR,
            label_font,
            label_inset,
            line_width: (edge / 33).max(2),
            line_margin: label_inset * 2 + label_font.cap_height(),
            draw_line: true,
        }
    }

    pub fn center(&self) -> Point {
        Point::new((self.size.width / 2) as i32, (self.size.height / 2) as i32)
    }

    /// Length of the needle, from the center to the tip
    pub fn line_length(&self) -> u32 {
        self.inner_radius.saturating_sub(self.line_margin)
    }

    /// Where the needle ends for a bearing. 0° is straight up and bearings
    /// increase clockwise, like a real compass. Since the screen's y axis
    /// points down, the cosine term is negated.
    pub fn line_end(&self, bearing_degrees: f64) -> Point {
        let theta = bearing_degrees.to_radians();
        let length = f64::from(self.line_length());
        self.center()
            + Point::new(
                (length * theta.sin()).round() as i32,
                -(length * theta.cos()).round() as i32,
            )
    }

    fn validate(&self) -> Result<(), CompassError> {
        let edge = self.size.width.min(self.size.height);
        if edge < MIN_SIZE {
            return Err(CompassError::Geometry(format!(
                "canvas is {}x{}, minimum is {MIN_SIZE}x{MIN_SIZE}",
                self.size.width, self.size.height
            )));
        }
        if self.size.width.max(self.size.height) > MAX_SIZE {
            return Err(CompassError::Geometry(format!(
                "canvas is {}x{}, maximum is {MAX_SIZE}x{MAX_SIZE}",
                self.size.width, self.size.height
            )));
        }
        // Disk spans center-r..=center+r
        let diameter = u64::from(self.outer_radius) * 2 + 1;
        if self.outer_radius == 0 || diameter > u64::from(edge) {
            return Err(CompassError::Geometry(format!(
                "outer radius {} doesn't fit in {edge}px",
                self.outer_radius
            )));
        }
        if self.inner_radius == 0 || self.inner_radius >= self.outer_radius {
            return Err(CompassError::Geometry(format!(
                "inner radius {} must be between 0 and outer radius {}",
                self.inner_radius, self.outer_radius
            )));
        }
        if self.draw_line && self.line_length() == 0 {
            return Err(CompassError::Geometry(format!(
                "line margin {} leaves no room inside radius {}",
                self.line_margin, self.inner_radius
            )));
        }
        Ok(())
    }
}

/// One cardinal label, positioned on the canvas
#[derive(Clone, Debug, PartialEq)]
pub struct LabelBox {
    pub text: &'static str,
    /// Pixels covered by the rendered glyph
    pub bounds: Rectangle,
    /// Position to hand the font renderer so the glyph lands on `bounds`
    origin: Point,
}

/// Measure each cardinal label and figure out where it goes. Each label's
/// outside edge sits [CompassStyle::label_inset] inside the inner rim, and
/// the label is centered on its axis.
pub fn label_boxes(
    style: &CompassStyle,
) -> Result<Vec<LabelBox>, CompassError> {
    let font = style.label_font.renderer();
    let center = style.center();
    let reach = style.inner_radius.saturating_sub(style.label_inset) as i32;

    LABELS
        .iter()
        .map(|&(text, cardinal)| {
            let dimensions = font
                .get_rendered_dimensions(
                    text,
                    Point::zero(),
                    VerticalPosition::Top,
                )
                .map_err(|err| CompassError::Label {
                    label: text,
                    message: format!("{err:?}"),
                })?;
            let glyph = dimensions.bounding_box.ok_or_else(|| {
                CompassError::Label {
                    label: text,
                    message: "glyph has no visible pixels".into(),
                }
            })?;

            let width = glyph.size.width as i32;
            let height = glyph.size.height as i32;
            let top_left = match cardinal {
                Cardinal::North => {
                    Point::new(center.x - width / 2, center.y - reach)
                }
                Cardinal::South => {
                    Point::new(center.x - width / 2, center.y + reach - height)
                }
                Cardinal::East => {
                    Point::new(center.x + reach - width, center.y - height / 2)
                }
                Cardinal::West => {
                    Point::new(center.x - reach, center.y - height / 2)
                }
            };

            Ok(LabelBox {
                text,
                bounds: Rectangle::new(top_left, glyph.size),
                origin: top_left - glyph.top_left,
            })
        })
        .collect()
}

/// Draw the compass for a wind bearing, in degrees clockwise from north.
/// Bearings outside 0-360 are fine, they just wrap around.
pub fn render(
    bearing_degrees: f64,
    style: &CompassStyle,
) -> Result<Raster, CompassError> {
    if !bearing_degrees.is_finite() {
        return Err(CompassError::InvalidBearing(bearing_degrees));
    }
    style.validate()?;

    let mut raster = Raster::new(style.size.width, style.size.height);
    let center = style.center();

    // Ring: big disk, then a smaller one on top of it
    for (radius, color) in [
        (style.outer_radius, style.outer_color),
        (style.inner_radius, style.inner_color),
    ] {
        infallible(
            Circle::with_center(center, radius * 2 + 1)
                .into_styled(PrimitiveStyle::with_fill(Rgb888::from(color)))
                .draw(&mut raster),
        );
    }

    let font = style.label_font.renderer();
    let label_color = Rgb888::from(style.label_color);
    for label in label_boxes(style)? {
        trace!("Drawing compass label {} at {:?}", label.text, label.bounds);
        font.render(
            label.text,
            label.origin,
            VerticalPosition::Top,
            FontColor::Transparent(label_color),
            &mut raster,
        )
        .map_err(|err| CompassError::Label {
            label: label.text,
            message: format!("{err:?}"),
        })?;
    }

    if style.draw_line {
        let end = style.line_end(bearing_degrees);
        trace!("Drawing compass needle for {bearing_degrees}° to {end:?}");
        let color = Rgb888::from(style.line_color);
        infallible(
            Line::new(center, end)
                .into_styled(PrimitiveStyle::with_stroke(
                    color,
                    style.line_width,
                ))
                .draw(&mut raster),
        );
        // Round off both ends of the stroke
        for point in [center, end] {
            infallible(
                Circle::with_center(point, style.line_width)
                    .into_styled(PrimitiveStyle::with_fill(color))
                    .draw(&mut raster),
            );
        }
    }

    Ok(raster)
}

/// Drawing onto a [Raster] can't fail
fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

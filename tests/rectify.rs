use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point as Vertex;

use rectify::transform::{pad, rotate};
use rectify::{
    Autotrim, AutotrimOptions, DefaultDimension, DetectionMethod, Fuzz, Mask, MaskOptions,
    Multicrop, MulticropOptions, Point, Quadrilateral, RectifyError, Unperspective,
    UnperspectiveOptions, Unrotate, UnrotateOptions,
};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const GRAY: Rgba<u8> = Rgba([60, 60, 60, 255]);

fn paint(img: &mut RgbaImage, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
    for py in y..y + height {
        for px in x..x + width {
            img.put_pixel(px, py, color);
        }
    }
}

#[test]
fn test_deskew_then_inner_trim() {
    let fuzz = Fuzz::new(25.0).unwrap();
    let page = pad(&RgbaImage::from_pixel(120, 80, BLACK), 20, WHITE);
    let scanned = rotate(&page, 9.0, WHITE).unwrap();

    let straight = Unrotate::new(UnrotateOptions::default().fuzz(fuzz))
        .execute(&scanned)
        .unwrap();
    let trimmed = Autotrim::new(AutotrimOptions::default().fuzz(fuzz).inner_trim(true))
        .execute(&straight)
        .unwrap();

    let (w, h) = trimmed.dimensions();
    assert!((100..=126).contains(&w), "width {}", w);
    assert!((64..=86).contains(&h), "height {}", h);
    assert!(trimmed.get_pixel(w / 2, h / 2)[0] < 64);
}

#[test]
fn test_detected_perspective_fills_output() {
    let mut img = RgbaImage::from_pixel(200, 160, WHITE);
    let corners = [
        Vertex::new(40, 30),
        Vertex::new(160, 40),
        Vertex::new(170, 130),
        Vertex::new(30, 120),
    ];
    draw_polygon_mut(&mut img, &corners, BLACK);

    let options = UnperspectiveOptions::default()
        .default_dimension(DefaultDimension::Width)
        .aspect_ratio(1.6)
        .method(DetectionMethod::Peak);
    let output = Unperspective::new(options)
        .unwrap()
        .execute_detected(&img)
        .unwrap();

    assert_eq!(output.dimensions(), (200, 125));
    for (x, y) in [(8, 8), (191, 8), (191, 116), (8, 116), (100, 62)] {
        assert!(output.get_pixel(x, y)[0] < 128, "light pixel at ({}, {})", x, y);
    }
}

#[test]
fn test_multicrop_reading_order() {
    let mut scan = RgbaImage::from_pixel(300, 200, WHITE);
    paint(&mut scan, 200, 10, 50, 30, GRAY);
    paint(&mut scan, 10, 100, 70, 40, BLACK);

    let outputs = Multicrop::new(MulticropOptions::default())
        .execute(&scan)
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].dimensions(), (50, 30));
    assert_eq!(*outputs[0].get_pixel(0, 0), GRAY);
    assert_eq!(outputs[1].dimensions(), (70, 40));
    assert_eq!(*outputs[1].get_pixel(69, 39), BLACK);
}

#[test]
fn test_fuzz_outside_percentage_rejected() {
    for percent in [-0.5, 100.5, f64::NAN] {
        let err = Fuzz::new(percent).unwrap_err();
        assert!(matches!(err, RectifyError::OutOfRange { name: "fuzz", .. }));
    }
}

#[test]
fn test_empty_image_rejected_everywhere() {
    let empty = RgbaImage::new(0, 0);
    let quad = Quadrilateral::new(
        Point::new(0.0, 0.0),
        Point::new(4.0, 0.0),
        Point::new(4.0, 4.0),
        Point::new(0.0, 4.0),
    )
    .unwrap();

    let results = [
        Mask::build(&empty, &MaskOptions::default()).map(|_| ()),
        Unrotate::default().execute(&empty).map(|_| ()),
        Unrotate::default().estimate_angle(&empty).map(|_| ()),
        Unperspective::default().execute(&empty, &quad).map(|_| ()),
        Unperspective::default().execute_detected(&empty).map(|_| ()),
        Autotrim::default().execute(&empty).map(|_| ()),
        Autotrim::default().trim_rect(&empty).map(|_| ()),
        Multicrop::default().execute(&empty).map(|_| ()),
        Multicrop::default().regions(&empty).map(|_| ()),
    ];

    for result in results {
        assert!(matches!(
            result,
            Err(RectifyError::InvalidArgument { name: "image", .. })
        ));
    }
}

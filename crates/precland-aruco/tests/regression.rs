use image::{GrayImage as PngImage, ImageFormat};
use nalgebra::Point2;
use precland_aruco::{draw_marker, ArucoDetector, ArucoParams, Dictionary};
use precland_core::{GrayImage, MarkerDetector};
use std::io::Cursor;
use std::path::Path;

fn data_dictionary() -> Dictionary {
    Dictionary::load_json(Path::new(env!("CARGO_MANIFEST_DIR")).join("data/DICT_4X4_50.json"))
        .expect("dictionary file")
}

/// Encode to PNG and back, the way frames arrive from disk in replay mode.
fn png_round_trip(img: &GrayImage) -> GrayImage {
    let png = PngImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .expect("buffer size");
    let mut bytes = Vec::new();
    png.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    let decoded = image::load_from_memory(&bytes)
        .expect("decode png")
        .to_luma8();
    GrayImage {
        width: decoded.width() as usize,
        height: decoded.height() as usize,
        data: decoded.into_raw(),
    }
}

/// Pad-like scene: large payload marker in the middle, small structural
/// markers around it, mild perspective.
fn pad_scene(dict: &Dictionary) -> (GrayImage, Vec<(u32, [Point2<f64>; 4])>) {
    let mut img = GrayImage::filled(480, 360, 210);
    let markers = vec![
        (
            7,
            [
                Point2::new(170.4, 110.2),
                Point2::new(311.8, 116.9),
                Point2::new(305.3, 255.6),
                Point2::new(164.1, 249.7),
            ],
        ),
        (
            0,
            [
                Point2::new(40.2, 30.5),
                Point2::new(100.6, 33.1),
                Point2::new(98.4, 92.8),
                Point2::new(38.0, 90.3),
            ],
        ),
        (
            12,
            [
                Point2::new(380.1, 262.0),
                Point2::new(441.7, 265.2),
                Point2::new(438.8, 326.4),
                Point2::new(377.5, 323.3),
            ],
        ),
    ];
    for (id, corners) in &markers {
        assert!(draw_marker(&mut img, dict, *id, corners).expect("draw"));
    }
    (img, markers)
}

#[test]
fn detects_pad_markers_after_png_round_trip() {
    let dict = data_dictionary();
    let (scene, truth) = pad_scene(&dict);
    let img = png_round_trip(&scene);

    let detector = ArucoDetector::new(&dict, ArucoParams::default()).expect("detector");
    let dets = detector.detect(&img.view());
    assert_eq!(dets.len(), truth.len());

    for (id, corners) in truth {
        let det = dets.iter().find(|d| d.id == id).expect("marker found");
        for (g, w) in det.corners.iter().zip(&corners) {
            assert!((g - w).norm() < 0.75, "id {id}: {g:?} vs {w:?}");
        }
    }
}

#[test]
fn detection_is_deterministic() {
    let dict = data_dictionary();
    let (scene, _) = pad_scene(&dict);
    let detector = ArucoDetector::new(&dict, ArucoParams::default()).expect("detector");
    let a = detector.detect(&scene.view());
    let b = detector.detect(&scene.view());
    assert_eq!(a, b);
}

#[test]
fn strict_matching_rejects_unknown_dictionary() {
    // same geometry, markers from a dictionary the detector was not built for
    let other = Dictionary::new("other", 4, 0, vec![0x0f0f, 0x3c3c]).expect("dict");
    let mut img = GrayImage::filled(200, 200, 220);
    let corners = [
        Point2::new(50.0, 50.0),
        Point2::new(150.0, 50.0),
        Point2::new(150.0, 150.0),
        Point2::new(50.0, 150.0),
    ];
    draw_marker(&mut img, &other, 0, &corners).expect("draw");

    let params = ArucoParams {
        max_hamming: Some(0),
        ..ArucoParams::default()
    };
    let detector = ArucoDetector::new(&data_dictionary(), params).expect("detector");
    let dets = detector.detect(&img.view());
    assert!(dets.is_empty(), "unexpected {dets:?}");
}

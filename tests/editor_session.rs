//! End-to-end behaviour of an editing session driven through its public
//! pointer and command surface.

use egui::{PointerButton, Pos2};
use image::{Rgba, RgbaImage};

use sketchfe::canvas::{CanvasState, LayerId};
use sketchfe::components::colors::{ColorModel, parse_hex};
use sketchfe::components::history::HistoryManager;
use sketchfe::components::tools::{Tool, flatten_path, smoothing_t};
use sketchfe::config::EditorConfig;
use sketchfe::io::{ImageSource, encode_png};
use sketchfe::lock::TimeLock;
use sketchfe::session::{EditorSession, GestureKind};

fn session() -> EditorSession {
    EditorSession::create(&EditorConfig::default())
}

fn gesture(s: &mut EditorSession, points: &[(f32, f32)]) {
    let (first, rest) = points.split_first().expect("at least one point");
    assert!(s.pointer_down(Pos2::new(first.0, first.1), PointerButton::Primary));
    for p in rest {
        s.pointer_move(Pos2::new(p.0, p.1));
    }
    let last = points[points.len() - 1];
    s.pointer_up(Pos2::new(last.0, last.1));
}

fn active_pixels(s: &EditorSession) -> RgbaImage {
    s.active_layer().unwrap().pixels.to_rgba_image()
}

#[test]
fn undo_and_redo_walk_strokes_byte_for_byte() {
    let mut s = session();
    s.set_brush_size(12.0);
    let blank = active_pixels(&s);

    let mut states = Vec::new();
    for (i, hex) in ["#FF0000", "#00FF00", "#0000FF"].iter().enumerate() {
        s.colors_mut().set_hex(hex).unwrap();
        let y = 100.0 + i as f32 * 40.0;
        gesture(&mut s, &[(50.0, y), (150.0, y + 10.0), (250.0, y)]);
        states.push(active_pixels(&s));
    }
    assert_ne!(states[2], blank);

    for expected in states[..2].iter().rev() {
        assert!(s.undo().is_some());
        assert_eq!(&active_pixels(&s), expected);
    }
    assert!(s.undo().is_some());
    assert_eq!(active_pixels(&s), blank);
    assert!(s.undo().is_none());

    for expected in &states {
        assert!(s.redo().is_some());
        assert_eq!(&active_pixels(&s), expected);
    }
    assert!(s.redo().is_none());
}

#[test]
fn selection_rectangle_stays_inside_the_raster() {
    let mut s = session();
    let (w, h) = (s.canvas().width as f32, s.canvas().height as f32);
    let check = |s: &EditorSession| {
        let sel = s.selection().expect("floating selection");
        assert!(sel.x >= 0.0 && sel.y >= 0.0, "origin {:?}", (sel.x, sel.y));
        assert!(sel.x + sel.w <= w + 1e-3, "right edge {}", sel.x + sel.w);
        assert!(sel.y + sel.h <= h + 1e-3, "bottom edge {}", sel.y + sel.h);
    };

    s.set_tool(Tool::Fill);
    gesture(&mut s, &[(100.0, 100.0), (400.0, 100.0), (400.0, 400.0), (100.0, 400.0)]);

    s.set_tool(Tool::Select);
    gesture(&mut s, &[(150.0, 150.0), (350.0, 150.0), (350.0, 350.0), (150.0, 350.0)]);
    // the lift leaves the selection dragging at the release point
    for p in [(-5000.0, -5000.0), (5000.0, 5000.0), (10.0, 3000.0)] {
        s.pointer_move(Pos2::new(p.0, p.1));
        check(&s);
    }
    s.pointer_up(Pos2::new(10.0, 3000.0));

    for corner in 0..4 {
        let handle = s.selection().unwrap().handles()[corner].1;
        assert!(s.pointer_down(handle, PointerButton::Primary));
        for p in [(-900.0, -900.0), (9000.0, 9000.0), (960.0, -50.0), (-50.0, 540.0)] {
            s.pointer_move(Pos2::new(p.0, p.1));
            check(&s);
        }
        s.pointer_up(Pos2::new(-50.0, 540.0));
    }
}

#[test]
fn smoothing_only_bends_between_samples() {
    let samples = [
        Pos2::new(0.0, 0.0),
        Pos2::new(40.0, 30.0),
        Pos2::new(80.0, 0.0),
        Pos2::new(120.0, 30.0),
    ];
    assert_eq!(flatten_path(&samples, smoothing_t(0.0)), samples.to_vec());

    let smooth = flatten_path(&samples, smoothing_t(0.8));
    for p in &samples {
        assert!(smooth.contains(p), "sample {:?} missing from smoothed path", p);
    }
    let off_polyline = |p: &Pos2| {
        samples
            .windows(2)
            .map(|seg| distance_to_segment(*p, seg[0], seg[1]))
            .fold(f32::INFINITY, f32::min)
    };
    let deviation = smooth.iter().map(off_polyline).fold(0.0, f32::max);
    assert!(deviation > 0.5, "smoothed path deviates only {}", deviation);
}

fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let t = ((p - a).dot(ab) / ab.length_sq()).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

#[test]
fn history_keeps_fifty_entries_per_layer() {
    let mut canvas = CanvasState::new(4, 4);
    let id = canvas.add_layer(None);
    let mut history = HistoryManager::default();

    for i in 0..51u8 {
        canvas.layer_mut(id).unwrap().pixels.put_pixel(0, 0, Rgba([i, 0, 0, 255]));
        assert!(history.snapshot(canvas.layer(id).unwrap()));
    }
    canvas.layer_mut(id).unwrap().pixels.put_pixel(0, 0, Rgba([99, 0, 0, 255]));
    assert_eq!(history.undo_count(id), 50);

    for _ in 0..50 {
        assert_eq!(history.undo(&mut canvas), Some(id));
    }
    // the first snapshot was evicted
    assert_eq!(canvas.layer(id).unwrap().pixels.get_pixel(0, 0).0, [1, 0, 0, 255]);
    assert_eq!(history.undo(&mut canvas), None);
}

#[test]
fn export_skips_hidden_reference_and_transparent_layers() {
    let mut canvas = CanvasState::new(8, 8);
    let fill = |canvas: &mut CanvasState, id: LayerId, color: [u8; 4]| {
        let layer = canvas.layer_mut(id).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                layer.pixels.put_pixel(x, y, Rgba(color));
            }
        }
    };

    let red = canvas.add_layer(Some("red"));
    fill(&mut canvas, red, [255, 0, 0, 255]);
    let green = canvas.add_layer(Some("green"));
    fill(&mut canvas, green, [0, 255, 0, 255]);
    canvas.set_visible(green, false);
    let blue = canvas.add_reference_layer("blue");
    fill(&mut canvas, blue, [0, 0, 255, 255]);
    let clear = canvas.add_layer(Some("clear"));
    fill(&mut canvas, clear, [255, 255, 0, 255]);
    canvas.set_opacity(clear, 0.0);

    let out = canvas.composite_for_export();
    assert_eq!(out.dimensions(), (8, 8));
    assert!(out.pixels().all(|p| p.0 == [255, 0, 0, 255]));
}

#[test]
fn hex_survives_the_hsv_round_trip() {
    for hex in ["#3388CC", "#000000", "#FFFFFF", "#7F1E9A"] {
        let want = parse_hex(hex).unwrap();
        let model = ColorModel::new(want);
        let got = parse_hex(model.hex()).unwrap();
        for c in 0..3 {
            assert!(
                (want[c] as i16 - got[c] as i16).abs() <= 1,
                "{} came back as {}",
                hex,
                model.hex()
            );
        }
    }
}

#[test]
fn reference_selection_commits_back_to_its_own_layer() {
    let mut s = session();
    let blue = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 255, 255]));
    let reference = s
        .add_reference_image(ImageSource::Bytes(encode_png(&blue).unwrap()))
        .unwrap();
    assert_eq!(s.wait_for_decodes(), 1);
    // centred, not upscaled
    let pixels = &s.layer(reference).unwrap().pixels;
    assert_eq!(pixels.get_pixel(960, 540).0, [0, 0, 255, 255]);
    assert_eq!(pixels.get_pixel(900, 540).0[3], 0);

    s.set_tool(Tool::Select);
    gesture(&mut s, &[(900.0, 480.0), (1020.0, 480.0), (1020.0, 600.0), (900.0, 600.0)]);
    assert!(s.selection().unwrap().from_reference);
    assert!(s.layer(reference).unwrap().pixels.is_blank());
    assert!(s.copy_selection().is_err());
    assert_eq!(s.take_notices().len(), 1);

    let base = s.layers()[0].id;
    assert!(s.select_layer(0));
    assert_eq!(s.commit_selection(), Some(reference));
    assert_eq!(s.layer(reference).unwrap().pixels.get_pixel(960, 540).0, [0, 0, 255, 255]);
    assert!(s.layer(base).unwrap().pixels.is_blank());

    // references never reach the export
    let png = s.export_png().unwrap();
    let out = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(out.get_pixel(960, 540).0, [255, 255, 255, 255]);
}

#[test]
fn engaging_the_lock_discards_the_stroke_in_flight() {
    let mut s = session();
    let lock = TimeLock::new();
    s.set_lock_signal(lock.signal());
    s.set_brush_size(10.0);
    gesture(&mut s, &[(20.0, 20.0), (200.0, 20.0)]);
    let before = active_pixels(&s);
    let id = s.active_layer().unwrap().id;
    assert_eq!(s.history().undo_count(id), 1);

    assert!(s.pointer_down(Pos2::new(20.0, 80.0), PointerButton::Primary));
    s.pointer_move(Pos2::new(200.0, 80.0));
    lock.set_expired(true);
    s.pointer_move(Pos2::new(300.0, 80.0));
    s.pointer_up(Pos2::new(300.0, 80.0));

    assert!(s.is_locked());
    assert_eq!(active_pixels(&s), before);
    assert_eq!(s.history().undo_count(id), 1);
    assert!(!s.pointer_down(Pos2::new(20.0, 80.0), PointerButton::Primary));

    lock.set_expired(false);
    assert!(s.pointer_down(Pos2::new(20.0, 80.0), PointerButton::Primary));
    s.pointer_move(Pos2::new(200.0, 80.0));
    s.pointer_up(Pos2::new(200.0, 80.0));
    assert_ne!(active_pixels(&s), before);
}

#[test]
fn lock_flicker_between_events_still_drops_the_stroke() {
    let mut s = session();
    let lock = TimeLock::new();
    s.set_lock_signal(lock.signal());
    s.set_brush_size(10.0);
    let id = s.active_layer().unwrap().id;

    assert!(s.pointer_down(Pos2::new(20.0, 80.0), PointerButton::Primary));
    s.pointer_move(Pos2::new(200.0, 80.0));
    lock.set_expired(true);
    lock.set_expired(false);
    s.pointer_up(Pos2::new(200.0, 80.0));

    assert!(!s.is_locked());
    assert_eq!(active_pixels(&s).get_pixel(100, 80).0[3], 0);
    assert_eq!(s.history().undo_count(id), 0);
    assert_eq!(s.gesture(), GestureKind::Idle);

    // the editor is usable again straight away
    gesture(&mut s, &[(20.0, 80.0), (200.0, 80.0)]);
    assert_eq!(active_pixels(&s).get_pixel(100, 80).0[3], 255);
}

#[test]
fn deleting_the_reference_drops_its_floating_selection() {
    let mut s = session();
    let blue = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 255, 255]));
    let reference = s
        .add_reference_image(ImageSource::Bytes(encode_png(&blue).unwrap()))
        .unwrap();
    assert_eq!(s.wait_for_decodes(), 1);
    let base = s.layers()[0].id;

    s.set_tool(Tool::Select);
    gesture(&mut s, &[(900.0, 480.0), (1020.0, 480.0), (1020.0, 600.0), (900.0, 600.0)]);
    assert!(s.selection().unwrap().from_reference);
    assert_eq!(s.active_layer().unwrap().id, reference);

    assert!(s.delete_active_layer(|_| true));
    assert!(s.layer(reference).is_none());
    assert!(s.selection().is_none());
    assert_eq!(s.gesture(), GestureKind::Idle);
    assert_eq!(s.commit_selection(), None);

    assert!(s.layer(base).unwrap().pixels.is_blank());
    assert_eq!(s.history().undo_count(base), 0);
    let png = s.export_png().unwrap();
    let out = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(out.get_pixel(960, 540).0, [255, 255, 255, 255]);
}

#[test]
fn right_click_puts_a_lifted_selection_back() {
    let mut s = session();
    s.set_tool(Tool::Fill);
    gesture(&mut s, &[(100.0, 100.0), (400.0, 100.0), (400.0, 400.0), (100.0, 400.0)]);
    let filled = active_pixels(&s);
    let id = s.active_layer().unwrap().id;
    let undo_depth = s.history().undo_count(id);

    s.set_tool(Tool::Select);
    gesture(&mut s, &[(150.0, 150.0), (350.0, 150.0), (350.0, 350.0), (150.0, 350.0)]);
    assert_eq!(s.gesture(), GestureKind::DraggingSelection);
    assert_eq!(active_pixels(&s).get_pixel(250, 250).0[3], 0);

    // drag it somewhere else, let go, then cancel
    s.pointer_move(Pos2::new(600.0, 600.0));
    s.pointer_up(Pos2::new(600.0, 600.0));
    assert_eq!(s.gesture(), GestureKind::Idle);
    assert!(s.selection().is_some());
    assert!(s.pointer_down(Pos2::new(600.0, 600.0), PointerButton::Secondary));

    assert!(s.selection().is_none());
    assert_eq!(s.gesture(), GestureKind::Idle);
    assert_eq!(active_pixels(&s), filled);
    assert_eq!(s.history().undo_count(id), undo_depth);

    // cancelling mid-drag works the same
    gesture(&mut s, &[(150.0, 150.0), (350.0, 150.0), (350.0, 350.0), (150.0, 350.0)]);
    s.pointer_move(Pos2::new(500.0, 500.0));
    assert!(s.pointer_down(Pos2::new(500.0, 500.0), PointerButton::Secondary));
    assert!(s.selection().is_none());
    assert_eq!(active_pixels(&s), filled);
}

#[test]
fn zoom_press_right_after_a_lift_starts_panning() {
    let mut s = session();
    s.set_tool(Tool::Fill);
    gesture(&mut s, &[(100.0, 100.0), (400.0, 100.0), (400.0, 400.0), (100.0, 400.0)]);
    s.set_tool(Tool::Select);
    gesture(&mut s, &[(150.0, 150.0), (350.0, 150.0), (350.0, 350.0), (150.0, 350.0)]);
    assert_eq!(s.gesture(), GestureKind::DraggingSelection);

    s.set_tool(Tool::Zoom);
    assert!(s.pointer_down(Pos2::new(700.0, 500.0), PointerButton::Primary));
    assert_eq!(s.gesture(), GestureKind::Panning);
    s.pointer_up(Pos2::new(720.0, 520.0));
    assert_eq!(s.gesture(), GestureKind::Idle);
    assert!(s.selection().is_some());
}

#[test]
fn async_export_matches_the_synchronous_one() {
    let mut s = session();
    s.set_brush_size(30.0);
    gesture(&mut s, &[(500.0, 500.0), (800.0, 600.0)]);
    let sync = s.export_png().unwrap();
    let handle = s.export_png_async();
    let bytes = handle.wait().unwrap();
    assert_eq!(bytes, sync);
}

#[test]
fn copied_pixels_paste_at_the_pointer() {
    let mut s = session();
    s.set_tool(Tool::Fill);
    gesture(&mut s, &[(100.0, 100.0), (400.0, 100.0), (400.0, 400.0), (100.0, 400.0)]);
    s.set_tool(Tool::Select);
    gesture(&mut s, &[(150.0, 150.0), (350.0, 150.0), (350.0, 350.0), (150.0, 350.0)]);
    assert!(s.selection_controls_visible());
    assert!(!s.has_clipboard());
    assert!(s.copy_selection().unwrap());
    assert!(s.has_clipboard());

    let base = s.layers()[0].id;
    assert_eq!(s.commit_selection(), Some(base));
    assert!(!s.selection_controls_visible());

    s.hover(Pos2::new(800.0, 700.0));
    assert!(s.paste_selection());
    let sel = s.selection().unwrap();
    assert!((sel.x + sel.w / 2.0 - 800.0).abs() < 1e-3);
    assert!((sel.y + sel.h / 2.0 - 700.0).abs() < 1e-3);
    assert_eq!(s.commit_selection(), Some(base));
    assert_eq!(active_pixels(&s).get_pixel(800, 700).0, [0, 0, 0, 255]);

    // the paste is a single undo step
    assert!(s.undo().is_some());
    assert_eq!(active_pixels(&s).get_pixel(800, 700).0[3], 0);
    assert_eq!(active_pixels(&s).get_pixel(250, 250).0, [0, 0, 0, 255]);
}

#[test]
fn layer_rows_drag_onto_each_other() {
    let mut s = session();
    s.add_layer(Some("A"));
    s.add_layer(Some("B"));
    let names = |s: &EditorSession| s.layers().iter().map(|l| l.name.clone()).collect::<Vec<_>>();

    // top row dropped onto the bottom row
    assert!(s.begin_layer_drag(0));
    assert!(s.drop_layer_on(2));
    assert_eq!(names(&s), ["B", "Base layer", "A"]);
    assert_eq!(s.active_layer().unwrap().name, "B");

    let lock = TimeLock::new();
    s.set_lock_signal(lock.signal());
    assert!(s.begin_layer_drag(0));
    lock.set_expired(true);
    assert!(!s.drop_layer_on(2));
    lock.set_expired(false);
    assert!(!s.drop_layer_on(2));
    assert_eq!(names(&s), ["B", "Base layer", "A"]);
}

#[test]
fn decodes_are_applied_when_collected() {
    let mut s = session();
    let red = RgbaImage::from_pixel(2000, 500, Rgba([255, 0, 0, 255]));
    s.add_reference_image(ImageSource::Bytes(encode_png(&red).unwrap()));
    assert_eq!(s.pending_decodes(), 1);
    assert_eq!(s.wait_for_decodes(), 1);
    assert_eq!(s.pending_decodes(), 0);
    assert_eq!(s.poll_decodes(), 0);

    // 2000x500 fits as 1920x480, centred vertically
    let layer = s.active_layer().unwrap();
    assert!(layer.is_reference);
    assert_eq!(layer.pixels.get_pixel(0, 300).0, [255, 0, 0, 255]);
    assert_eq!(layer.pixels.get_pixel(0, 299).0[3], 0);
    assert_eq!(layer.pixels.get_pixel(1919, 779).0, [255, 0, 0, 255]);
    assert_eq!(layer.pixels.get_pixel(0, 780).0[3], 0);
    s.dispose();
}

#[test]
fn slider_edits_flow_through_hsv() {
    let mut colors = ColorModel::default();
    colors.set_wheel_center(Pos2::new(200.0, 200.0));
    colors.set_hue(240.0);
    colors.set_saturation(1.0);
    colors.set_value(1.0);
    assert_eq!(colors.hex(), "#0000FF");
    colors.set_value(0.0);
    assert_eq!(colors.hex(), "#000000");
}

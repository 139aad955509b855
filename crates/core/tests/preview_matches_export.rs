use oscshow_core::{
    audio::CHANNELS, export::WAV_HEADER_LEN, Canvas, ConvertedSignal, OfflineExporter,
    PlaybackMode, RealtimeRenderer, ShowController, TimelineConfig, Visualizer,
};

const SAMPLE_RATE: u32 = 8_000;

fn constant(value: f32, len: usize) -> ConvertedSignal {
    ConvertedSignal {
        signal_left: vec![value; len],
        signal_right: vec![-value; len],
        sample_rate: Some(SAMPLE_RATE),
        name: None,
    }
}

fn show(animate: f64) -> ShowController {
    let mut controller = ShowController::new(TimelineConfig::default());
    controller.set_mode(PlaybackMode::Show);
    controller.set_sample_rate(SAMPLE_RATE);
    controller.set_show_interval(5.0);
    controller.set_animate_duration(animate);
    controller.set_wav_duration(30.0);
    controller.add_to_playlist(constant(0.25, 40), "first").unwrap();
    controller.add_to_playlist(constant(0.5, 90), "second").unwrap();
    controller.add_to_playlist(constant(0.75, 25), "third").unwrap();
    controller
}

fn export_left(bytes: &[u8], frame: usize) -> i16 {
    let offset = WAV_HEADER_LEN + frame * 4;
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[test]
fn all_consumers_agree_on_the_active_asset() {
    let controller = show(1.0);
    let handle = controller.handle();
    let scene = handle.scene();

    handle.seek(12.0);
    let resolved = scene.resolve(12.0);
    assert_eq!(resolved.index, Some(2));
    assert_eq!(resolved.segment_time, 2.0);
    assert_eq!(resolved.progress, 1.0);

    let visualizer = Visualizer::new(Canvas::new(100.0, 100.0));
    let trace = visualizer.sample(&scene, handle.position());
    assert_eq!(trace.signal.as_ref().map(|s| s.name()), Some("third"));
    assert_eq!(trace.visible_len, 25);

    let mut renderer = RealtimeRenderer::new(handle.clone());
    let mut block = vec![0.0; 64 * CHANNELS];
    renderer.render(&mut block);
    assert!(block.chunks(CHANNELS).all(|frame| frame == [0.75, -0.75]));

    let bytes = OfflineExporter::new(scene).render().unwrap();
    let frame = 12 * SAMPLE_RATE as usize;
    assert_eq!(export_left(&bytes, frame), (0.75_f32 * 32767.0) as i16);
}

#[test]
fn live_and_offline_follow_the_same_show_loop() {
    let controller = show(0.0);
    let handle = controller.handle();
    let bytes = OfflineExporter::new(handle.scene()).render().unwrap();
    let mut renderer = RealtimeRenderer::new(handle.clone());
    let mut block = vec![0.0; 16 * CHANNELS];

    for position in [0.0, 4.9, 5.0, 7.5, 10.0, 14.9, 15.0, 21.0, 29.0] {
        handle.seek(position);
        renderer.render(&mut block);
        let live = block[0];

        let frame = (position * SAMPLE_RATE as f64) as usize;
        let offline = export_left(&bytes, frame) as f32 / 32767.0;

        assert!(
            (live - offline).abs() < 1e-3,
            "position {position}: live {live} vs offline {offline}"
        );
    }
}

#[test]
fn both_paths_are_silent_at_the_start_of_a_draw_in() {
    let controller = show(2.0);
    let handle = controller.handle();
    let bytes = OfflineExporter::new(handle.scene()).render().unwrap();

    handle.seek(10.0);
    let mut renderer = RealtimeRenderer::new(handle.clone());
    let mut block = vec![1.0; 8 * CHANNELS];
    renderer.render(&mut block);

    assert!(block.iter().all(|sample| *sample == 0.0));
    assert_eq!(export_left(&bytes, 10 * SAMPLE_RATE as usize), 0);
}

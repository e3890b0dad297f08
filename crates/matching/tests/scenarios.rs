use foundation::ids::{FileId, RegionId};
use foundation::math::Vec2;
use foundation::view::FrameView;
use matching::{
    FrameInfo, LinearWcs, LinearWcsProvider, MatchError, MatchingAxis, RegionKind, Session, SessionConfig, SessionError,
    SessionEvent, SpectralAxis, SpectralMatching,
};
use pretty_assertions::assert_eq;
use requirements::{Binding, RequirementRecord, Widget, WidgetKind};
use streaming::protocol::ClientMessage;
use streaming::transport::RecordingTransport;

type TestSession = Session<RecordingTransport, LinearWcsProvider>;

struct Builder {
    wcs: LinearWcsProvider,
    frames: Vec<FrameInfo>,
    config: SessionConfig,
}

impl Builder {
    fn new() -> Self {
        Self {
            wcs: LinearWcsProvider::new(),
            frames: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Square image whose pixels are `cdelt` world units wide, sharing its
    /// world origin with every other frame.
    fn image(mut self, id: i32, size: u32, cdelt: f64) -> Self {
        let handle = self
            .wcs
            .register(LinearWcs::new(Vec2::ZERO, Vec2::ZERO, Vec2::new(cdelt, cdelt)));
        self.frames.push(FrameInfo::new(FileId(id), size, size, handle));
        self
    }

    /// Unit-pixel image whose axes are turned `degrees` against north.
    fn rotated_image(mut self, id: i32, size: u32, degrees: f64) -> Self {
        let handle = self.wcs.register(
            LinearWcs::new(Vec2::ZERO, Vec2::ZERO, Vec2::new(1.0, 1.0)).with_rotation(degrees),
        );
        let mut info = FrameInfo::new(FileId(id), size, size, handle);
        info.rotated = true;
        self.frames.push(info);
        self
    }

    /// Cube with a linear frequency axis of `step` Hz per channel.
    fn cube(mut self, id: i32, size: u32, depth: u32, step: f64) -> Self {
        let handle = self.wcs.register(
            LinearWcs::new(Vec2::ZERO, Vec2::ZERO, Vec2::new(1.0, 1.0)).with_spectral(SpectralAxis {
                crpix: 0.0,
                crval: 1e9,
                cdelt: step,
                rest_frequency: Some(1e9),
            }),
        );
        self.frames
            .push(FrameInfo::new(FileId(id), size, size, handle).with_depth(depth, handle));
        self
    }

    fn config(mut self, f: impl FnOnce(&mut SessionConfig)) -> Self {
        f(&mut self.config);
        self
    }

    fn build(self) -> TestSession {
        let mut session = Session::new(self.config, self.wcs, RecordingTransport::new());
        for info in self.frames {
            session.open_frame(info).unwrap();
        }
        session
    }
}

fn close_view(a: FrameView, b: FrameView) -> bool {
    a.mip == b.mip
        && (a.x_min - b.x_min).abs() < 1e-9
        && (a.x_max - b.x_max).abs() < 1e-9
        && (a.y_min - b.y_min).abs() < 1e-9
        && (a.y_max - b.y_max).abs() < 1e-9
}

fn settle(session: &mut TestSession) {
    session.advance(1_000);
    session.transport_mut().take();
}

#[test]
fn set_then_clear_spatial_reference_restores_view_and_regions() {
    let mut session = Builder::new().image(1, 256, 1.0).image(2, 256, 0.5).build();
    let (f1, f2) = (FileId(1), FileId(2));
    session.set_render_size(100.0, 100.0, 1.0);
    session.set_center(f2, Vec2::new(10.0, 20.0)).unwrap();
    session.set_zoom(f2, 3.0, false).unwrap();
    let region = session
        .add_region(f2, RegionKind::Rectangle, vec![Vec2::new(30.0, 40.0)], 10.0)
        .unwrap();
    let before = session.frame(f2).unwrap().regions.get(region).cloned();

    session.set_matching_enabled(f2, MatchingAxis::Spatial, true).unwrap();
    assert_eq!(session.frame(f2).unwrap().spatial.reference, Some(f1));
    assert!(session.frame(f2).unwrap().regions.is_empty());
    assert_eq!(session.frame(f1).unwrap().regions.len(), 1);

    session.set_matching_enabled(f2, MatchingAxis::Spatial, false).unwrap();
    let frame = session.frame(f2).unwrap();
    assert_eq!(frame.center, Vec2::new(10.0, 20.0));
    assert_eq!(frame.zoom, 3.0);
    assert_eq!(frame.regions.get(region).cloned(), before);
    assert!(session.frame(f1).unwrap().regions.is_empty());
}

#[test]
fn twice_sampled_secondary_sees_twice_the_pixels() {
    let mut session = Builder::new().image(1, 256, 1.0).image(2, 512, 0.5).build();
    let (f1, f2) = (FileId(1), FileId(2));
    session.set_render_size(100.0, 100.0, 1.0);
    session.set_center(f1, Vec2::new(50.0, 50.0)).unwrap();
    session.set_matching_enabled(f2, MatchingAxis::Spatial, true).unwrap();

    assert_eq!(session.required_frame_view(f1), FrameView::new(0.0, 100.0, 0.0, 100.0, 1));
    let view = session.required_frame_view(f2);
    assert!(close_view(view, FrameView::new(0.0, 200.0, 0.0, 200.0, 2)), "{view:?}");

    // Panning the secondary moves the reference.
    session.set_center(f2, Vec2::new(200.0, 200.0)).unwrap();
    assert!(session.frame(f1).unwrap().center.distance(Vec2::new(100.0, 100.0)) < 1e-9);
}

#[test]
fn secondary_zoom_is_converted_into_reference_pixels() {
    let mut session = Builder::new().image(1, 256, 1.0).image(2, 512, 0.5).build();
    session.set_matching_enabled(FileId(2), MatchingAxis::Spatial, true).unwrap();
    session.set_zoom(FileId(2), 1.0, false).unwrap();
    assert!((session.frame(FileId(1)).unwrap().zoom - 2.0).abs() < 1e-12);
    session.set_zoom(FileId(2), 1.0, true).unwrap();
    assert_eq!(session.frame(FileId(1)).unwrap().zoom, 1.0);
}

#[test]
fn ten_view_changes_in_one_window_send_one_request() {
    let mut session = Builder::new().image(1, 2048, 1.0).build();
    let f1 = FileId(1);
    session.set_render_size(300.0, 300.0, 1.0);
    settle(&mut session);

    for i in 0..10 {
        session.set_center(f1, Vec2::new(200.0 + 100.0 * f64::from(i), 400.0)).unwrap();
        session.advance(2);
    }
    let expected = session.required_tiles(f1).unwrap().encoded_by_focus();
    session.advance(50);

    let requests: Vec<_> = session
        .transport()
        .messages()
        .iter()
        .filter_map(|m| match m {
            ClientMessage::AddRequiredTiles(tiles) => Some(tiles.tiles.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec![expected]);
}

#[test]
fn lone_cube_channel_change_sends_one_set_channels() {
    let mut session = Builder::new().cube(1, 256, 10, 1e6).build();
    let f1 = FileId(1);
    let touched = session.set_channels(f1, 5.0, 0, true).unwrap();
    assert_eq!(touched, vec![f1]);
    assert_eq!(session.frame(f1).unwrap().required_channel, 5);

    session.advance(499);
    assert!(session.transport().messages().is_empty());
    session.advance(1);
    assert_eq!(
        session.transport().messages(),
        &[ClientMessage::SetChannels {
            file_id: f1,
            channel: 5,
            stokes: 0,
            required_tiles: None,
        }]
    );
    assert_eq!(session.frame(f1).unwrap().channel, 5);
}

#[test]
fn visible_frame_channel_change_carries_tiles() {
    let mut session = Builder::new().cube(1, 256, 10, 1e6).build();
    session.set_render_size(100.0, 100.0, 1.0);
    settle(&mut session);
    session.set_channels(FileId(1), 2.0, 0, false).unwrap();
    session.advance(500);
    match session.transport().messages() {
        [ClientMessage::SetChannels {
            channel: 2,
            required_tiles: Some(tiles),
            ..
        }] => assert!(!tiles.tiles.is_empty()),
        other => panic!("unexpected messages {other:?}"),
    }
}

#[test]
fn spectral_chain_touches_each_sibling_once() {
    let mut session = Builder::new()
        .cube(1, 64, 20, 1e6)
        .cube(2, 64, 20, 2e6)
        .cube(3, 64, 20, 4e6)
        .config(|c| c.spectral_matching = SpectralMatching::Frequency)
        .build();
    let (a, b, c) = (FileId(1), FileId(2), FileId(3));
    session.link(b, a, MatchingAxis::Spectral).unwrap();
    assert_eq!(session.link(c, b, MatchingAxis::Spectral).unwrap(), a);

    let touched = session.set_channels(a, 8.0, 0, true).unwrap();
    assert_eq!(touched, vec![a, b, c]);
    assert_eq!(session.frame(b).unwrap().required_channel, 4);
    assert_eq!(session.frame(c).unwrap().required_channel, 2);

    // Driving a secondary moves the reference and the other secondary.
    let touched = session.set_channels(c, 3.0, 0, true).unwrap();
    assert_eq!(touched, vec![c, a, b]);
    assert_eq!(session.frame(a).unwrap().required_channel, 12);
}

#[test]
fn channel_changes_of_siblings_go_out_in_one_batch() {
    let mut session = Builder::new()
        .cube(1, 64, 20, 1e6)
        .cube(2, 64, 20, 1e6)
        .config(|c| c.spectral_matching = SpectralMatching::Channel)
        .build();
    session.set_matching_enabled(FileId(2), MatchingAxis::Spectral, true).unwrap();
    session.set_channels(FileId(1), 7.0, 0, true).unwrap();
    session.advance(500);
    let channels: Vec<_> = session
        .transport()
        .messages()
        .iter()
        .filter_map(|m| match m {
            ClientMessage::SetChannels { file_id, channel, .. } => Some((*file_id, *channel)),
            _ => None,
        })
        .collect();
    assert_eq!(channels, vec![(FileId(1), 7), (FileId(2), 7)]);
}

#[test]
fn requirements_are_only_sent_when_they_change() {
    let mut session = Builder::new().cube(1, 64, 10, 1e6).build();
    session.add_widget(Widget::new(
        Binding::Active,
        WidgetKind::Stats {
            region: RegionId::IMAGE,
            coordinate: "z".into(),
        },
    ));
    session.advance(200);
    let first = session.transport_mut().take();
    assert!(matches!(first.as_slice(), [ClientMessage::SetRequirements(RequirementRecord::Stats(_))]));

    session.advance(200);
    assert!(session.transport().messages().is_empty());
}

#[test]
fn closing_the_reference_promotes_the_next_frame() {
    let mut session = Builder::new()
        .image(1, 128, 1.0)
        .image(2, 128, 1.0)
        .image(3, 128, 1.0)
        .build();
    let (f1, f2, f3) = (FileId(1), FileId(2), FileId(3));
    session.set_matching_enabled(f2, MatchingAxis::Spatial, true).unwrap();
    session.set_matching_enabled(f3, MatchingAxis::Spatial, true).unwrap();
    session.close_frame(f1).unwrap();

    assert_eq!(session.reference(MatchingAxis::Spatial), Some(f2));
    assert_eq!(session.frame(f2).unwrap().spatial.reference, None);
    assert_eq!(session.frame(f3).unwrap().spatial.reference, Some(f2));
    assert_eq!(session.frame(f2).unwrap().spatial.secondaries, vec![f3]);
    assert!(session.events().iter().any(|e| e.payload
        == SessionEvent::ReferencePromoted {
            axis: MatchingAxis::Spatial,
            from: f1,
            to: Some(f2),
        }));
    assert!(session
        .transport()
        .messages()
        .contains(&ClientMessage::CloseFile { file_id: f1 }));
}

#[test]
fn closing_the_last_frame_clears_references() {
    let mut session = Builder::new().cube(1, 64, 4, 1e6).build();
    assert_eq!(session.reference(MatchingAxis::Spectral), Some(FileId(1)));
    session.close_frame(FileId(1)).unwrap();
    for axis in MatchingAxis::ALL {
        assert_eq!(session.reference(axis), None);
    }
    assert_eq!(session.active_frame(), None);
}

#[test]
fn refused_link_reports_and_changes_nothing() {
    let mut session = Builder::new().image(1, 64, 1.0).image(2, 64, 1.0).build();
    let mut info = session.frame(FileId(2)).unwrap().info.clone();
    info.file_id = FileId(3);
    info.square_pixels = false;
    session.open_frame(info).unwrap();

    let err = session
        .set_matching_enabled(FileId(3), MatchingAxis::Spatial, true)
        .unwrap_err();
    assert!(matches!(err, SessionError::Match(MatchError::NonSquarePixels { .. })));
    assert_eq!(session.frame(FileId(3)).unwrap().spatial.reference, None);
    assert!(session
        .events()
        .iter()
        .any(|e| matches!(e.payload, SessionEvent::MatchingRefused { .. })));
}

#[test]
fn session_reference_change_re_points_matched_frames() {
    let mut session = Builder::new()
        .image(1, 64, 1.0)
        .image(2, 64, 1.0)
        .image(3, 64, 1.0)
        .build();
    let (f1, f2, f3) = (FileId(1), FileId(2), FileId(3));
    session.set_matching_enabled(f2, MatchingAxis::Raster, true).unwrap();
    session.set_matching_enabled(f3, MatchingAxis::Raster, true).unwrap();

    session.set_raster_scaling_reference(f2).unwrap();
    assert_eq!(session.frame(f1).unwrap().raster.reference, Some(f2));
    assert_eq!(session.frame(f3).unwrap().raster.reference, Some(f2));
    assert_eq!(session.frame(f2).unwrap().raster.reference, None);
}

#[test]
fn playback_acknowledges_tiles_and_holds_the_played_frame() {
    let mut session = Builder::new().cube(1, 64, 10, 1e6).build();
    let f1 = FileId(1);
    session.start_animation().unwrap();
    session.set_channels(f1, 3.0, 0, false).unwrap();
    session.advance(600);
    assert!(session.transport().messages().is_empty());

    assert!(session.on_tile_received(f1, 4, 0));
    match session.transport().messages() {
        [ClientMessage::AnimationFlowControl { received_frame, .. }] => assert_eq!(received_frame.channel, 4),
        other => panic!("unexpected messages {other:?}"),
    }
    assert_eq!(session.frame(f1).unwrap().channel, 4);
    assert!(!session.on_tile_received(FileId(9), 1, 0));

    session.stop_animation();
    assert!(!session.is_animating());
}

#[test]
fn switching_active_frame_flushes_the_previous_one() {
    let mut session = Builder::new().cube(1, 64, 10, 1e6).cube(2, 64, 10, 1e6).build();
    settle(&mut session);
    session.set_channels(FileId(2), 6.0, 0, false).unwrap();
    session.set_active_frame(FileId(1)).unwrap();
    assert_eq!(
        session.transport().messages(),
        &[ClientMessage::SetChannels {
            file_id: FileId(2),
            channel: 6,
            stokes: 0,
            required_tiles: None,
        }]
    );
}

#[test]
fn snapshot_exposes_links() {
    let mut session = Builder::new().image(1, 64, 1.0).image(2, 64, 1.0).build();
    session.set_matching_enabled(FileId(2), MatchingAxis::Spatial, true).unwrap();
    let snapshot = session.frame_snapshot(FileId(2)).unwrap();
    assert_eq!(snapshot.spatial_reference, Some(FileId(1)));
    assert_eq!(snapshot.spectral_reference, None);
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["spatial_reference"], 1);
}

#[test]
fn closing_a_frame_releases_control_maps_both_ways() {
    let mut session = Builder::new().image(1, 64, 1.0).image(2, 64, 1.0).image(3, 64, 1.0).build();
    let (f1, f2, f3) = (FileId(1), FileId(2), FileId(3));
    session.register_control_map(f2, f1).unwrap();
    session.register_control_map(f1, f2).unwrap();
    session.register_control_map(f3, f2).unwrap();
    let _ = session.drain_events();

    session.close_frame(f1).unwrap();

    let mut released: Vec<_> = session
        .events()
        .iter()
        .filter_map(|e| match e.payload {
            SessionEvent::ControlMapReleased { owner, other } => Some((owner, other)),
            _ => None,
        })
        .collect();
    released.sort();
    assert_eq!(released, vec![(f1, f2), (f2, f1)]);
    assert!(session.frame(f2).unwrap().control_maps.is_empty());
    assert!(session.frame(f3).unwrap().control_maps.contains(&f2));
}

#[test]
fn rotated_datasets_wait_longer_for_cursor_updates() {
    let mut session = Builder::new().image(1, 64, 1.0).rotated_image(2, 64, 30.0).build();
    session.set_active_frame(FileId(1)).unwrap();
    settle(&mut session);

    let start = session.now();
    session.set_cursor(FileId(1), Vec2::new(5.0, 5.0)).unwrap();
    assert_eq!(session.coordinator().next_deadline(), Some(start.after(200)));
    settle(&mut session);

    session.set_active_frame(FileId(2)).unwrap();
    settle(&mut session);
    let start = session.now();
    session.set_cursor(FileId(2), Vec2::new(5.0, 5.0)).unwrap();
    assert_eq!(session.coordinator().next_deadline(), Some(start.after(300)));
}

#[test]
fn fitting_a_rotated_secondary_boxes_its_corners_in_reference_pixels() {
    let mut session = Builder::new().image(1, 256, 1.0).rotated_image(2, 256, 45.0).build();
    let (f1, f2) = (FileId(1), FileId(2));
    session.set_render_size(100.0, 100.0, 1.0);
    session.set_matching_enabled(f2, MatchingAxis::Spatial, true).unwrap();

    session.fit_zoom(f2).unwrap();

    let expected = 100.0 / (256.0 * std::f64::consts::SQRT_2);
    let zoom = session.frame(f1).unwrap().zoom;
    assert!((zoom - expected).abs() < 1e-9, "{zoom} != {expected}");
    let t = session.frame(f2).unwrap().spatial_transform.unwrap();
    let center = t.forward(Vec2::new(127.5, 127.5));
    assert!(session.frame(f1).unwrap().center.distance(center) < 1e-9);
}

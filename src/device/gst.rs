use gstreamer::prelude::*;
use gstreamer::{Bus, ClockTime, MessageType, MessageView, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::backend::{CaptureBackend, DeviceDescriptor, FrameSink, StreamHandle};
use crate::config::CameraConfig;
use crate::error::DeviceError;
use crate::frame::LumaFrame;

/// V4L2 cameras through GStreamer, delivering GRAY8 frames
pub struct GstBackend {
    config: CameraConfig,
}

impl GstBackend {
    pub fn new(config: CameraConfig) -> Result<Self, DeviceError> {
        gstreamer::init().map_err(|e| {
            error!("Failed to initialize GStreamer: {}", e);
            DeviceError::NoCaptureApi
        })?;

        if gstreamer::ElementFactory::find("v4l2src").is_none() {
            warn!("GStreamer v4l2src element not installed");
            return Err(DeviceError::NoCaptureApi);
        }

        Ok(Self { config })
    }

    fn build_pipeline_string(&self, device_path: &str) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap ! \
             videoconvert ! videoscale ! \
             video/x-raw,format=GRAY8,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
            device_path, width, height, self.config.fps
        )
    }

    /// Surface permission problems before GStreamer hides them behind a state change error
    fn check_access(device_path: &str) -> Result<(), DeviceError> {
        match OpenOptions::new().read(true).write(true).open(device_path) {
            Ok(_) => Ok(()),
            Err(e) => Err(match e.kind() {
                ErrorKind::PermissionDenied => DeviceError::PermissionDenied {
                    device: device_path.to_string(),
                },
                _ => DeviceError::Unavailable {
                    device: device_path.to_string(),
                    details: e.to_string(),
                },
            }),
        }
    }

    fn sample_to_frame(sample: &gstreamer::Sample, id: u64) -> Option<LumaFrame> {
        let buffer = sample.buffer()?;
        let caps = sample.caps()?;
        let info = VideoInfo::from_caps(caps).ok()?;
        let map = buffer.map_readable().ok()?;
        let stride = info.stride().first().copied().unwrap_or(info.width() as i32) as u32;

        LumaFrame::from_strided(id, map.as_slice(), info.width(), info.height(), stride)
    }

    /// Forward the first pipeline error or end-of-stream into `frames` until stopped
    fn watch_bus(bus: Bus, device: String, frames: FrameSink, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Acquire) && !frames.is_closed() {
            let msg = match bus.timed_pop_filtered(
                ClockTime::from_mseconds(200),
                &[MessageType::Error, MessageType::Eos],
            ) {
                Some(msg) => msg,
                None => continue,
            };

            let details = match msg.view() {
                MessageView::Error(err) => format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                ),
                MessageView::Eos(..) => "stream ended".to_string(),
                _ => continue,
            };

            if stop.load(Ordering::Acquire) {
                break;
            }
            error!("Capture stream on {} failed: {}", device, details);
            let _ = frames.blocking_send(Err(DeviceError::Unavailable {
                device: device.clone(),
                details,
            }));
            break;
        }
        debug!("Bus watch on {} exited", device);
    }
}

impl CaptureBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let monitor = gstreamer::DeviceMonitor::new();
        let caps = gstreamer::Caps::new_empty_simple("video/x-raw");
        monitor.add_filter(Some("Video/Source"), Some(&caps));

        monitor.start().map_err(|e| {
            warn!("Failed to start GStreamer device monitor: {}", e);
            DeviceError::NoCaptureApi
        })?;
        let devices = monitor.devices();
        monitor.stop();

        let descriptors = devices
            .iter()
            .filter_map(|device| {
                let props = device.properties()?;
                let path = props
                    .get::<String>("api.v4l2.path")
                    .or_else(|_| props.get::<String>("device.path"))
                    .ok()?;
                Some(DeviceDescriptor::new(path, device.display_name().to_string()))
            })
            .collect();

        Ok(descriptors)
    }

    fn open(&self, device_id: &str, frames: FrameSink) -> Result<StreamHandle, DeviceError> {
        Self::check_access(device_id)?;

        let pipeline_desc = self.build_pipeline_string(device_id);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let unavailable = |details: String| DeviceError::Unavailable {
            device: device_id.to_string(),
            details,
        };

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| unavailable(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| unavailable("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|sink| sink.downcast::<AppSink>().ok())
            .ok_or_else(|| unavailable("Pipeline has no appsink".to_string()))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| unavailable("Pipeline has no bus".to_string()))?;

        let frame_counter = Arc::new(AtomicU64::new(0));
        let bus_frames = frames.clone();
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    let id = frame_counter.fetch_add(1, Ordering::Relaxed);

                    match Self::sample_to_frame(&sample, id) {
                        Some(frame) => {
                            if frames.try_send(Ok(frame)).is_err() {
                                trace!("Decoder busy, dropping frame {}", id);
                            }
                        }
                        None => trace!("Could not map sample {}", id),
                    }

                    if frames.is_closed() {
                        return Err(gstreamer::FlowError::Eos);
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(unavailable(format!("Failed to start pipeline: {}", e)));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let watcher = {
            let stop = Arc::clone(&stop);
            let device = device_id.to_string();
            std::thread::Builder::new()
                .name("poscan-bus".to_string())
                .spawn(move || Self::watch_bus(bus, device, bus_frames, stop))
        };
        if let Err(e) = watcher {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(unavailable(format!("Failed to watch pipeline bus: {}", e)));
        }

        info!("Capture stream opened on {}", device_id);

        let device = device_id.to_string();
        Ok(StreamHandle::new(device_id, move || {
            stop.store(true, Ordering::Release);
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                error!("Failed to stop GStreamer pipeline on {}: {}", device, e);
            }
        }))
    }
}

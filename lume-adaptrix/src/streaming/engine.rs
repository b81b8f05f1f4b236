use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use lume_core::{Buffer, Device};

use crate::format::{padded_page_count, read_placeholders, BakeMetadata, PageHeader, PlaceholderMesh};
use crate::settings::StreamingSettings;
use crate::streaming::draw::DrawResources;
use crate::streaming::feedback::PageRequest;
use crate::streaming::jobs::{HeaderReceiver, PageLoadJob, PageLoadResult, PageLoader};
use crate::streaming::pool::FencedBufferPool;
use crate::streaming::residency::{transition, PageStatus, PlaceholderChange};
use crate::streaming::resident::{PageStrides, ResidentBuffers, FEEDBACK_WORDS};
use crate::{AdaptrixError, AdaptrixResult};

/// Host callbacks. Placeholder callbacks only fire while placeholders are enabled.
pub trait StreamingHooks {
    fn activate_placeholder(&mut self, _page: u32) {}
    fn deactivate_placeholder(&mut self, _page: u32) {}
    /// One indexed-indirect draw over the compacted index buffer.
    fn draw_material(&mut self, _material: usize, _args_offset: u64) {}
    fn draw_placeholder(&mut self, _page: u32, _mesh: &PlaceholderMesh) {}
}

#[derive(Default)]
pub struct NoHooks;

impl StreamingHooks for NoHooks {}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    pub unloaded: usize,
    pub waiting: usize,
    pub loading: usize,
    pub loaded: usize,
    pub too_far: usize,
    pub jobs_running: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Free,
    /// Claimed by a running job.
    Reserved,
    Resident(u32),
}

struct JobSlot<D: Device> {
    running: bool,
    staging: Option<Vec<u32>>,
    uploads: FencedBufferPool<D>,
}

struct EngineState<D: Device> {
    metadata: BakeMetadata,
    page_count: usize,
    strides: PageStrides,
    buffers: ResidentBuffers<D>,
    draw: DrawResources<D>,
    loader: PageLoader,
    pending_headers: Option<HeaderReceiver>,
    headers: Vec<PageHeader>,
    status: Vec<PageStatus>,
    slots: Vec<Slot>,
    jobs: Vec<JobSlot<D>>,
    load_queue: VecDeque<u32>,
    unload_queue: VecDeque<usize>,
    placeholders: Vec<PlaceholderMesh>,
}

/// Keeps the resident page slots in step with GPU feedback.
pub struct StreamingEngine<D: Device, H: StreamingHooks = NoHooks> {
    device: D,
    dir: PathBuf,
    settings: StreamingSettings,
    hooks: H,
    state: Option<EngineState<D>>,
}

impl<D: Device> StreamingEngine<D, NoHooks> {
    pub fn open<P: AsRef<Path>>(device: D, dir: P, settings: StreamingSettings) -> Self {
        Self::with_hooks(device, dir, settings, NoHooks)
    }
}

impl<D: Device, H: StreamingHooks> StreamingEngine<D, H> {
    /// Reads the bake metadata, allocates every resident buffer and starts
    /// the header job. Failures are logged and leave the engine inert.
    pub fn with_hooks<P: AsRef<Path>>(device: D, dir: P, settings: StreamingSettings, hooks: H) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let state = match Self::initialize(&device, &dir, &settings) {
            Ok(state) => Some(state),
            Err(e) => {
                log::error!("virtual geometry streaming disabled: {}", e);
                None
            }
        };
        Self { device, dir, settings, hooks, state }
    }

    fn initialize(device: &D, dir: &Path, settings: &StreamingSettings) -> AdaptrixResult<EngineState<D>> {
        let metadata = BakeMetadata::read(dir)?;
        let strides = PageStrides::from_metadata(&metadata);
        if !strides.is_valid() {
            return Err(AdaptrixError::MissingBake(dir.display().to_string()));
        }

        let page_count = padded_page_count(metadata.filled_page_count as usize);
        let loadable = page_count.min(settings.max_loadable_pages.max(1));
        let largest = strides.attribute().max(strides.index) as u64 * loadable as u64;
        if largest > u32::MAX as u64 {
            return Err(AdaptrixError::PageOverflow { page: 0, values: largest });
        }

        let buffers = ResidentBuffers::new(
            device,
            strides,
            page_count as u32,
            loadable as u32,
            settings.camera_load_distance,
        )?;
        let draw = DrawResources::new(
            device,
            metadata.material_vertex_counts.len(),
            strides.index,
            loadable as u32,
            settings.shadow_cascade_count,
        )?;

        let job_count = settings.upload_buffer_count.max(1);
        let upload_bytes = strides.upload_words() as u64 * 4;
        let jobs = (0..job_count)
            .map(|_| JobSlot {
                running: false,
                staging: Some(vec![0u32; strides.upload_words()]),
                uploads: FencedBufferPool::new(upload_bytes, settings.fence_frames),
            })
            .collect();

        let loader = PageLoader::new(dir.to_path_buf(), job_count)?;
        let pending_headers = Some(loader.load_headers(page_count));

        log::info!(
            "virtual geometry streaming: {} pages ({} filled), {} loadable slots, {} upload buffers",
            page_count,
            metadata.filled_page_count,
            loadable,
            job_count
        );

        Ok(EngineState {
            metadata,
            page_count,
            strides,
            buffers,
            draw,
            loader,
            pending_headers,
            headers: Vec::new(),
            status: vec![PageStatus::Unloaded; page_count],
            slots: vec![Slot::Free; loadable],
            jobs,
            load_queue: VecDeque::with_capacity(loadable),
            unload_queue: VecDeque::with_capacity(loadable),
            placeholders: Vec::new(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Headers are loaded and feedback is being processed.
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.pending_headers.is_none())
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn metadata(&self) -> Option<&BakeMetadata> {
        self.state.as_ref().map(|s| &s.metadata)
    }

    pub fn page_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.page_count)
    }

    pub fn resident_buffers(&self) -> Option<&ResidentBuffers<D>> {
        self.state.as_ref().map(|s| &s.buffers)
    }

    pub fn draw_resources(&self) -> Option<&DrawResources<D>> {
        self.state.as_ref().map(|s| &s.draw)
    }

    pub fn page_status(&self, page: u32) -> Option<PageStatus> {
        self.state.as_ref().and_then(|s| s.status.get(page as usize).copied())
    }

    pub fn slots(&self) -> &[Slot] {
        self.state.as_ref().map(|s| s.slots.as_slice()).unwrap_or(&[])
    }

    pub fn stats(&self) -> StreamingStats {
        let mut stats = StreamingStats::default();
        let Some(state) = &self.state else {
            return stats;
        };
        for status in &state.status {
            match status {
                PageStatus::Unloaded => stats.unloaded += 1,
                PageStatus::Waiting => stats.waiting += 1,
                PageStatus::Loading => stats.loading += 1,
                PageStatus::Loaded => stats.loaded += 1,
                PageStatus::TooFar => stats.too_far += 1,
            }
        }
        stats.jobs_running = state.jobs.iter().filter(|j| j.running).count();
        stats
    }

    pub fn set_camera_load_distance(&mut self, distance: f32) -> AdaptrixResult<()> {
        self.settings.camera_load_distance = distance;
        if let Some(state) = &self.state {
            state.buffers.set_camera_load_distance(distance)?;
        }
        Ok(())
    }

    pub fn set_shadow_cascade_count(&mut self, count: u32) -> AdaptrixResult<()> {
        self.settings.shadow_cascade_count = count;
        if let Some(state) = &mut self.state {
            state.draw.set_cascade_count(&self.device, count)?;
        }
        Ok(())
    }

    /// Toggles placeholders. Pages already showing one get the matching
    /// activate or deactivate callback.
    pub fn set_placeholders_enabled(&mut self, enabled: bool) {
        if enabled == self.settings.placeholders_enabled {
            return;
        }
        if !enabled {
            self.notify_placeholders(false);
            self.settings.placeholders_enabled = false;
            return;
        }
        self.settings.placeholders_enabled = true;
        if self.is_ready() {
            self.load_placeholders();
            if self.settings.placeholders_enabled {
                self.notify_placeholders(true);
            }
        }
    }

    fn notify_placeholders(&mut self, active: bool) {
        let Some(state) = &self.state else {
            return;
        };
        for (page, status) in state.status.iter().enumerate() {
            if !status.shows_placeholder() {
                continue;
            }
            if active {
                self.hooks.activate_placeholder(page as u32);
            } else {
                self.hooks.deactivate_placeholder(page as u32);
            }
        }
    }

    /// Per-frame tick: picks up the header job, registers draws and flips
    /// the visibility bitmaps.
    pub fn update(&mut self) {
        let polled = match &self.state {
            Some(state) => state.pending_headers.as_ref().map(|rx| rx.try_recv()),
            None => return,
        };
        match polled {
            Some(Ok(headers)) => self.finish_headers(headers),
            Some(Err(crossbeam_channel::TryRecvError::Disconnected)) => self.fail("header job vanished".to_string()),
            Some(Err(crossbeam_channel::TryRecvError::Empty)) | None => {}
        }

        self.draw();
        if let Some(state) = &mut self.state {
            state.buffers.visibility.swap();
        }
    }

    /// Blocks until the header job has finished.
    pub fn wait_for_headers(&mut self) -> AdaptrixResult<()> {
        let Some(rx) = self.state.as_mut().and_then(|s| s.pending_headers.clone()) else {
            return if self.is_initialized() { Ok(()) } else { Err(AdaptrixError::NotInitialized) };
        };
        match rx.recv() {
            Ok(headers) => self.finish_headers(headers),
            Err(_) => self.fail("header job vanished".to_string()),
        }
        if self.is_ready() { Ok(()) } else { Err(AdaptrixError::NotInitialized) }
    }

    fn fail(&mut self, reason: String) {
        log::error!("virtual geometry streaming disabled: {}", reason);
        self.state = None;
    }

    fn finish_headers(&mut self, headers: AdaptrixResult<Vec<PageHeader>>) {
        let headers = match headers {
            Ok(headers) => headers,
            Err(e) => return self.fail(e.to_string()),
        };
        let Some(state) = &mut self.state else {
            return;
        };
        if let Err(e) = state.buffers.write_page_data(&headers) {
            return self.fail(e.to_string());
        }
        state.headers = headers;
        state.pending_headers = None;
        if self.settings.placeholders_enabled {
            self.load_placeholders();
        }
    }

    fn load_placeholders(&mut self) {
        let Some(state) = &mut self.state else {
            return;
        };
        match read_placeholders(&self.dir) {
            Ok(mut placeholders) => {
                placeholders.truncate(state.page_count);
                log::info!("retrieved {} placeholder meshes", placeholders.len());
                state.placeholders = placeholders;
            }
            Err(e) => {
                log::error!("placeholders disabled: {:#}", e);
                self.settings.placeholders_enabled = false;
            }
        }
    }

    /// Reads the feedback words back from the GPU feedback buffer.
    pub fn process_gpu_feedback(&mut self) -> AdaptrixResult<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        let mut bytes = vec![0u8; FEEDBACK_WORDS as usize * 4];
        state.buffers.feedback.read_data(0, &mut bytes)?;
        let mut words = vec![0u32; FEEDBACK_WORDS as usize];
        crate::format::words_from_bytes(&bytes, &mut words);
        self.process_feedback(&words);
        Ok(())
    }

    /// Applies one frame of feedback, then schedules and completes loads.
    pub fn process_feedback(&mut self, feedback: &[u32]) {
        if !self.is_ready() {
            return;
        }
        let placeholders = self.settings.placeholders_enabled;
        let Some(state) = &mut self.state else {
            return;
        };

        state.load_queue.clear();
        for &word in feedback.iter().take(state.page_count) {
            let request = PageRequest::decode(word);
            let page = request.page as usize;
            let Some(&status) = state.status.get(page) else {
                log::debug!("feedback names page {} beyond {}", page, state.page_count);
                continue;
            };
            let requested = request.lod_level != 0 && state.headers.get(page).is_some_and(|h| h.instance_count != 0);

            let next = transition(status, requested, request.too_far);
            if next.enqueue {
                state.load_queue.push_back(request.page);
            }
            if next.unload {
                if let Some(slot) = state.slots.iter().position(|s| *s == Slot::Resident(request.page)) {
                    state.unload_queue.push_back(slot);
                }
            }
            if placeholders {
                match next.placeholder {
                    PlaceholderChange::Activate => self.hooks.activate_placeholder(request.page),
                    PlaceholderChange::Deactivate => self.hooks.deactivate_placeholder(request.page),
                    PlaceholderChange::Keep => {}
                }
            }
            state.status[page] = next.status;
        }

        if let Err(e) = self.kickoff() {
            log::error!("page streaming kickoff failed: {}", e);
        }
        self.wrapup();
    }

    fn kickoff(&mut self) -> AdaptrixResult<()> {
        let Some(state) = &mut self.state else {
            return Ok(());
        };

        while let Some(slot) = state.unload_queue.pop_front() {
            state.slots[slot] = Slot::Free;
            state.buffers.set_slot_page(slot, None)?;
        }

        let mut could_load = true;
        while !state.load_queue.is_empty() && could_load {
            could_load = false;
            for slot in 0..state.slots.len() {
                if state.load_queue.is_empty() {
                    break;
                }
                if state.slots[slot] != Slot::Free {
                    continue;
                }
                let Some(job) = state.jobs.iter().position(|j| !j.running) else {
                    continue;
                };
                let Some(page) = pop_waiting(&mut state.load_queue, &state.status) else {
                    break;
                };

                // 失败时页面仍为 Waiting, 槽位仍空闲
                let job_slot = &mut state.jobs[job];
                job_slot.uploads.begin_frame(&self.device)?;
                state.status[page as usize] = PageStatus::Loading;
                state.slots[slot] = Slot::Reserved;

                let staging = job_slot
                    .staging
                    .take()
                    .unwrap_or_else(|| vec![0u32; state.strides.upload_words()]);
                job_slot.running = true;

                state.loader.submit(PageLoadJob {
                    page,
                    slot,
                    job,
                    header: state.headers[page as usize],
                    strides: state.strides,
                    staging,
                });
                could_load = true;
            }
        }
        Ok(())
    }

    fn wrapup(&mut self) {
        while let Some(done) = self.state.as_ref().and_then(|s| s.loader.try_recv()) {
            self.finish_job(done);
        }
    }

    /// Blocks until every running load has been uploaded.
    pub fn flush(&mut self) {
        loop {
            let Some(state) = &self.state else {
                return;
            };
            if !state.jobs.iter().any(|j| j.running) {
                return;
            }
            match state.loader.recv() {
                Some(done) => self.finish_job(done),
                None => return,
            }
        }
    }

    fn finish_job(&mut self, done: PageLoadResult) {
        let placeholders = self.settings.placeholders_enabled;
        let Some(state) = &mut self.state else {
            return;
        };
        let PageLoadResult { page, slot, job, staging, result } = done;

        let uploaded = result.and_then(|()| {
            let upload = state.jobs[job].uploads.current().ok_or(AdaptrixError::NotInitialized)?;
            upload.write_data(0, bytemuck::cast_slice(&staging))?;
            state.buffers.copy_from_upload(&self.device, upload, slot)?;
            state.buffers.set_slot_page(slot, Some(page))?;
            Ok(())
        });

        let job_slot = &mut state.jobs[job];
        job_slot.uploads.end_frame();
        job_slot.staging = Some(staging);
        job_slot.running = false;

        match uploaded {
            Ok(()) => {
                state.status[page as usize] = PageStatus::Loaded;
                state.slots[slot] = Slot::Resident(page);
                log::trace!("page {} resident in slot {}", page, slot);
            }
            Err(e) => {
                log::error!("failed to stream page {}: {}", page, e);
                state.status[page as usize] = PageStatus::Unloaded;
                state.slots[slot] = Slot::Free;
            }
        }
        if placeholders {
            self.hooks.deactivate_placeholder(page);
        }
    }

    fn draw(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        for (material, &vertex_count) in state.metadata.material_vertex_counts.iter().enumerate() {
            if material > 0 && vertex_count == 0 {
                continue;
            }
            self.hooks.draw_material(material, DrawResources::<D>::args_offset(material));
        }

        if self.settings.placeholders_enabled {
            for (page, mesh) in state.placeholders.iter().enumerate() {
                if !mesh.is_empty() && state.status[page].shows_placeholder() {
                    self.hooks.draw_placeholder(page as u32, mesh);
                }
            }
        }
    }
}

/// Next queued page that still waits for a slot. Duplicates and pages whose
/// status moved on are dropped.
fn pop_waiting(queue: &mut VecDeque<u32>, status: &[PageStatus]) -> Option<u32> {
    while let Some(page) = queue.pop_front() {
        if status.get(page as usize) == Some(&PageStatus::Waiting) {
            return Some(page);
        }
    }
    None
}

impl<D: Device, H: StreamingHooks> Drop for StreamingEngine<D, H> {
    fn drop(&mut self) {
        self.flush();
        if self.state.is_some() {
            let _ = self.device.wait_idle();
        }
    }
}

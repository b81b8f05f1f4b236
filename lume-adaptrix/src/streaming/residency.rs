//! Per-page residency state machine driven by GPU feedback.

#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PageStatus {
    #[default]
    Unloaded = 0,
    /// Requested, queued for a load slot.
    Waiting = 1,
    Loading = 2,
    Loaded = 3,
    /// Beyond the camera load distance; only the placeholder is drawn.
    TooFar = 4,
}

impl PageStatus {
    /// Pages whose placeholder stands in for the real geometry.
    pub fn shows_placeholder(self) -> bool {
        matches!(self, PageStatus::Waiting | PageStatus::Loading | PageStatus::TooFar)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaceholderChange {
    Keep,
    Activate,
    Deactivate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub status: PageStatus,
    /// Push the page onto this pass's load queue.
    pub enqueue: bool,
    /// Release the slot holding the page.
    pub unload: bool,
    pub placeholder: PlaceholderChange,
}

impl Transition {
    fn stay(status: PageStatus) -> Self {
        Self { status, enqueue: false, unload: false, placeholder: PlaceholderChange::Keep }
    }
}

/// Next state of a page given this frame's feedback.
pub fn transition(status: PageStatus, requested: bool, too_far: bool) -> Transition {
    use PageStatus::*;
    use PlaceholderChange::*;

    let stay = Transition::stay(status);
    match status {
        Unloaded if requested => Transition { status: Waiting, enqueue: true, placeholder: Activate, ..stay },
        Unloaded if too_far => Transition { status: TooFar, placeholder: Activate, ..stay },
        Unloaded => stay,

        Loaded if !requested => Transition { status: Unloaded, unload: true, ..stay },
        Loaded if too_far => Transition { status: TooFar, unload: true, placeholder: Activate, ..stay },
        Loaded => stay,

        // 仍被请求: 重新入队 (队列每次反馈都会清空)
        Waiting if requested => Transition { enqueue: true, ..stay },
        Waiting if too_far => Transition { status: TooFar, ..stay },
        Waiting => Transition { status: Unloaded, placeholder: Deactivate, ..stay },

        Loading => stay,

        TooFar if requested => Transition { status: Waiting, enqueue: true, ..stay },
        TooFar if !too_far => Transition { status: Unloaded, placeholder: Deactivate, ..stay },
        TooFar => stay,
    }
}

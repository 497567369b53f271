//! Toggle sound cues
//!
//! Short on/off cues embedded as WAVE resources in the payload DLL, played
//! asynchronously so the render thread never blocks on the audio stack.
//! Playback is strictly fire-and-forget: a missing resource or an audio
//! stack failure is swallowed.

/// Resource IDs of the embedded WAVE cues.
pub const RES_CUE_ON: u16 = 101;
pub const RES_CUE_OFF: u16 = 102;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    On,
    Off,
}

impl Cue {
    pub fn for_state(enabled: bool) -> Cue {
        if enabled {
            Cue::On
        } else {
            Cue::Off
        }
    }

    fn resource_id(self) -> u16 {
        match self {
            Cue::On => RES_CUE_ON,
            Cue::Off => RES_CUE_OFF,
        }
    }
}

#[cfg(windows)]
pub fn play_cue(cue: Cue) {
    use windows::core::PCSTR;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::Media::Audio::{PlaySoundA, SND_ASYNC, SND_NODEFAULT, SND_RESOURCE};
    use windows::Win32::System::LibraryLoader::{
        GetModuleHandleExA, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
        GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    };

    // Resolve our own module so SND_RESOURCE looks the WAVE up in the
    // payload DLL, not the host executable.
    let mut module = HMODULE::default();
    let ok = unsafe {
        GetModuleHandleExA(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCSTR(play_cue as *const u8),
            &mut module,
        )
    };
    if ok.is_err() {
        return;
    }

    // MAKEINTRESOURCE: the low word of the pointer is the resource ID.
    let name = PCSTR(cue.resource_id() as usize as *const u8);
    unsafe {
        let _ = PlaySoundA(name, module, SND_RESOURCE | SND_ASYNC | SND_NODEFAULT);
    }
}

#[cfg(not(windows))]
pub fn play_cue(_cue: Cue) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cue_for_state() {
        assert_eq!(Cue::for_state(true), Cue::On);
        assert_eq!(Cue::for_state(false), Cue::Off);
    }
}

//! Device handle tying bring-up and loading together.
//!
//! A [`Device`] owns the register window, the AE table and the firmware
//! mode it was opened for. Operations must run in order:
//!
//! ```text
//! open_firmware ─> bring_up ─> load ─> start
//! ```

use bytes::Bytes;
use qat_chip::{DeviceFamily, FirmwareMode};
use qat_firmware::{Container, DeviceTarget};

use crate::ae::AeTable;
use crate::bringup;
use crate::config::HalConfig;
use crate::csr::Hal;
use crate::error::{QatError, Result};
use crate::loader::{signed, unsigned, DmaAllocator};
use crate::mmio::RegisterWindow;

/// One accelerator and its firmware state.
#[derive(Debug)]
pub struct Device<W: RegisterWindow> {
    hal: Hal<W>,
    table: AeTable,
    mode: FirmwareMode,
    revision: u16,
    brought_up: bool,
    loaded: Option<FirmwareMode>,
}

impl<W: RegisterWindow> Device<W> {
    /// Device over `window` running firmware in the family's default mode.
    ///
    /// # Errors
    ///
    /// Invalid input if the window is too small or `ae_mask` names AEs the
    /// family does not have.
    pub fn new(window: W, family: DeviceFamily, ae_mask: u32, revision: u16, config: HalConfig) -> Result<Self> {
        let hal = Hal::new(window, family, ae_mask, config)?;
        tracing::debug!("{family} rev {revision}: AEs {ae_mask:#x}");
        Ok(Self {
            hal,
            table: AeTable::new(family, ae_mask),
            mode: family.default_firmware_mode(),
            revision,
            brought_up: false,
            loaded: None,
        })
    }

    /// Override the firmware mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: FirmwareMode) -> Self {
        self.mode = mode;
        self
    }

    /// Device family
    #[must_use]
    pub const fn family(&self) -> DeviceFamily {
        self.hal.family()
    }

    /// Firmware mode
    #[must_use]
    pub const fn mode(&self) -> FirmwareMode {
        self.mode
    }

    /// Register access
    #[must_use]
    pub const fn hal(&self) -> &Hal<W> {
        &self.hal
    }

    /// Mutable register access
    pub fn hal_mut(&mut self) -> &mut Hal<W> {
        &mut self.hal
    }

    /// Per-AE load state
    #[must_use]
    pub const fn ae_table(&self) -> &AeTable {
        &self.table
    }

    /// Whether bring-up has completed.
    #[must_use]
    pub const fn is_brought_up(&self) -> bool {
        self.brought_up
    }

    /// Parse `buf` and check it can run on this device. Nothing is written
    /// to hardware.
    ///
    /// # Errors
    ///
    /// Format or compatibility errors from the container, or a
    /// compatibility error if its signing does not match the device mode.
    pub fn open_firmware(&self, buf: Bytes, name: Option<&str>) -> Result<Container> {
        let container = Container::parse(buf, name)?;
        container.check_compat(&DeviceTarget::new(self.family(), self.revision))?;
        let wanted = self.mode == FirmwareMode::Signed;
        if container.is_signed() != wanted {
            return Err(qat_firmware::FirmwareError::compatibility(format!(
                "{} expects {} firmware",
                self.family(),
                if wanted { "signed" } else { "unsigned" }
            ))
            .into());
        }
        Ok(container)
    }

    /// Reset and initialise every enabled AE.
    ///
    /// # Errors
    ///
    /// Hardware timeout from any bring-up step. The device stays marked as
    /// not brought up.
    pub fn bring_up(&mut self) -> Result<()> {
        self.brought_up = false;
        self.loaded = None;
        self.table.reset();
        bringup::bring_up(&mut self.hal, self.mode)?;
        self.brought_up = true;
        Ok(())
    }

    /// Load every image of `container`. Returns the number of AEs that
    /// received firmware.
    ///
    /// # Errors
    ///
    /// Precondition before bring-up or on a container of the wrong kind;
    /// otherwise any loader error.
    pub fn load<D: DmaAllocator>(&mut self, container: &Container, dma: &mut D) -> Result<usize> {
        if !self.brought_up {
            return Err(QatError::precondition("device has not been brought up"));
        }
        let (count, kind) = match (container, self.mode) {
            (Container::Uof(uof), FirmwareMode::Unsigned) => {
                (unsigned::load(&mut self.hal, &mut self.table, uof)?, FirmwareMode::Unsigned)
            }
            (Container::Suof(suof), FirmwareMode::Signed) => {
                (signed::load(&mut self.hal, suof, dma)?, FirmwareMode::Signed)
            }
            _ => {
                return Err(QatError::precondition(format!(
                    "{:?} device cannot load this container",
                    self.mode
                )));
            }
        };
        self.loaded = Some(kind);
        tracing::info!("{} loaded firmware onto {count} AEs", self.family());
        Ok(count)
    }

    /// Start every loaded AE. Returns the number started.
    ///
    /// # Errors
    ///
    /// Precondition if nothing has been loaded; otherwise any CSR or FCU
    /// error.
    pub fn start(&mut self) -> Result<usize> {
        match self.loaded {
            Some(FirmwareMode::Unsigned) => unsigned::start(&mut self.hal, &self.table),
            Some(FirmwareMode::Signed) => signed::start(&mut self.hal),
            None => Err(QatError::precondition("no firmware loaded")),
        }
    }

    /// Release the register window.
    pub fn into_window(self) -> W {
        self.hal.into_window()
    }
}

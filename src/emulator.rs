//! serprog-over-TCP emulator
//!
//! Serves the dispatcher to one host at a time. The simulated board, and
//! with it the flash contents, survives across sessions.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use picoprog_core::bus::SpiBus;
use picoprog_core::{Dispatcher, Error};

use crate::error::EmuError;
use crate::flash::{EmulatedFlash, FlashConfig};
use crate::sim::{SimBoard, TcpLink};

/// Emulator settings
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Flash identity and size
    pub flash: FlashConfig,
    /// Chip select the flash is wired to
    pub flash_cs: usize,
    /// Initial flash contents
    pub image: Option<PathBuf>,
    /// Write the flash back to `image` after every session
    pub save: bool,
}

/// A simulated programmer waiting for hosts
pub struct Emulator {
    board: SimBoard,
    image: Option<PathBuf>,
    save: bool,
}

impl Emulator {
    /// Build the board, loading the image if one is given
    pub fn new(config: EmulatorConfig) -> Result<Self, EmuError> {
        let flash = match &config.image {
            Some(path) if path.exists() => {
                let data = std::fs::read(path).map_err(|source| EmuError::Image {
                    path: path.clone(),
                    source,
                })?;
                log::info!("Loaded {} bytes from {}", data.len(), path.display());
                EmulatedFlash::with_data(config.flash, &data)?
            }
            _ => EmulatedFlash::new(config.flash)?,
        };
        let board = SimBoard::new(flash, config.flash_cs)?;
        Ok(Self {
            board,
            image: config.image,
            save: config.save,
        })
    }

    /// The simulated board
    pub fn board(&self) -> &SimBoard {
        &self.board
    }

    /// Accept hosts forever
    pub fn serve(&self, listener: &TcpListener) -> Result<(), EmuError> {
        log::info!("serprog emulator listening on {}", listener.local_addr()?);
        self.serve_connections(listener.incoming())
    }

    /// Serve each connection in turn.
    ///
    /// A host that goes away early or a failed image save only ends its own
    /// session; a bus error stops the emulator.
    pub fn serve_connections(
        &self,
        connections: impl IntoIterator<Item = std::io::Result<TcpStream>>,
    ) -> Result<(), EmuError> {
        for stream in connections {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Accepting host failed: {}", e);
                    continue;
                }
            };
            match self.session(stream) {
                Ok(()) => {}
                Err(e @ EmuError::Session(_)) => return Err(e),
                Err(e) => log::warn!("Session aborted: {}", e),
            }
        }
        Ok(())
    }

    /// Serve one host until it disconnects
    pub fn session(&self, stream: TcpStream) -> Result<(), EmuError> {
        let peer = stream.peer_addr()?;
        log::info!("Host connected from {}", peer);

        let link = TcpLink::new(stream)?;
        let mut dispatcher = Dispatcher::new(
            link,
            SpiBus::new(self.board.spi()),
            self.board.chip_selects(),
        );
        dispatcher.enable_bus();

        let result = match dispatcher.run() {
            Err(Error::Disconnected) => {
                log::info!("Host {} disconnected", peer);
                Ok(())
            }
            Err(Error::Transport(kind)) => {
                log::warn!("Link to {} failed: {:?}", peer, kind);
                Ok(())
            }
            Err(e) => Err(EmuError::Session(e)),
            Ok(never) => match never {},
        };
        log::debug!(
            "Session ended with SPI clock at {} Hz",
            self.board.spi_clock_hz()
        );
        dispatcher.disable_bus();

        if self.save {
            self.save_image()?;
        }
        result
    }

    fn save_image(&self) -> Result<(), EmuError> {
        let Some(path) = &self.image else {
            return Ok(());
        };
        self.board
            .with_flash(|flash| std::fs::write(path, flash.data()))
            .map_err(|source| EmuError::Image {
                path: path.clone(),
                source,
            })?;
        log::info!("Saved flash image to {}", path.display());
        Ok(())
    }
}

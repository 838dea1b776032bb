use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::wav_format;

/// Streaming WAV file writer for captured render blocks.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, sizes patched on close]
/// [frames exactly as the render client produced them...]
/// ```
pub struct WavFileWriter {
    file_path: PathBuf,
    format: AudioFormat,
    file: Option<BufWriter<File>>,
    data_bytes: u64,
}

impl WavFileWriter {
    pub fn new(file_path: PathBuf, format: AudioFormat) -> Self {
        Self {
            file_path,
            format,
            file: None,
            data_bytes: 0,
        }
    }

    /// Create the file and write a header with a zero data size.
    pub fn open(&mut self) -> Result<(), CaptureError> {
        if self.file.is_some() {
            return Ok(());
        }
        if self.format.block_align == 0 {
            return Err(CaptureError::ConfigurationFailed("block align is zero".into()));
        }

        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&self.file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;
        let mut file = BufWriter::new(file);
        file.write_all(&wav_format::generate_wav_header(&self.format, 0))
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;

        self.file = Some(file);
        self.data_bytes = 0;
        Ok(())
    }

    /// Append one block. Trailing bytes that do not form a whole frame are
    /// dropped so the file stays frame aligned.
    pub fn write(&mut self, block: &[u8]) -> Result<(), CaptureError> {
        let align = self.format.block_align as usize;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::StorageError("file is not open for writing".into()))?;

        let whole = block.len() / align * align;
        file.write_all(&block[..whole])
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.data_bytes += whole as u64;
        Ok(())
    }

    /// Finalize the header sizes and close the file. Returns the number of
    /// audio bytes written.
    pub fn close(&mut self) -> Result<u64, CaptureError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;

        let data_size = u32::try_from(self.data_bytes).unwrap_or(u32::MAX);
        if u64::from(data_size) != self.data_bytes {
            log::warn!("{} exceeds the WAV size limit, header is clamped", self.file_path.display());
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.write_all(&wav_format::generate_wav_header(&self.format, data_size))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.flush().map_err(|e| CaptureError::StorageError(e.to_string()))?;

        Ok(self.data_bytes)
    }

    /// Audio bytes written so far (excluding the header).
    pub fn bytes_written(&self) -> u64 {
        self.data_bytes
    }

    pub fn duration_secs(&self) -> f64 {
        self.format.duration_secs(self.data_bytes)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize {}: {}", self.file_path.display(), e);
            }
        }
    }
}

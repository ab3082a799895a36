//! The attendance desk: enrollment, check-in and the read-side queries,
//! over the registry, roster and ledger the daemon owns.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, NaiveDateTime};
use rollcall_core::{
    check_in, AddOutcome, AnalyzerError, AttendanceLedger, AttendanceRecord, CheckIn, FaceAnalyzer,
    FaceCapture, GateSnapshot, HistoryLookup, IdentityMatcher, IdentityRegistry, LedgerError, LedgerFormat,
    RegistryError, RegistryStore, Roster, RosterError, Student,
};
use rollcall_hw::Frame;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("identity {0} is not on the roster")]
    UnknownIdentity(String),
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected; exactly one is required")]
    MultipleFaces(usize),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub identity: String,
    /// Embeddings stored for the identity after this one.
    pub encodings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub enrolled_identities: usize,
    pub total_encodings: usize,
    pub ledger_format: LedgerFormat,
    pub handed_off: bool,
}

struct Identities {
    registry: IdentityRegistry,
    store: RegistryStore,
}

pub struct AttendanceDesk {
    analyzer: Mutex<Box<dyn FaceAnalyzer>>,
    identities: Mutex<Identities>,
    roster: Roster,
    ledger: AttendanceLedger,
    matcher: IdentityMatcher,
}

impl AttendanceDesk {
    /// Build the desk, loading the registry from `store`.
    pub fn new(
        analyzer: Box<dyn FaceAnalyzer>,
        store: RegistryStore,
        roster: Roster,
        ledger: AttendanceLedger,
        matcher: IdentityMatcher,
    ) -> Result<Self, DeskError> {
        let registry = store.load()?;
        tracing::info!(
            identities = registry.enrolled_count(),
            encodings = registry.total_embeddings(),
            "registry loaded"
        );
        Ok(Self {
            analyzer: Mutex::new(analyzer),
            identities: Mutex::new(Identities { registry, store }),
            roster,
            ledger,
            matcher,
        })
    }

    /// Check in whoever is in the uploaded image.
    pub fn check_in_image(&self, image: &str) -> Result<CheckIn, DeskError> {
        self.check_in_at(image, Local::now().naive_local())
    }

    pub fn check_in_at(&self, image: &str, at: NaiveDateTime) -> Result<CheckIn, DeskError> {
        let frame = decode_image(image)?;
        let capture = self.analyze(&frame)?;
        let identities = self.identities();
        let outcome = check_in(capture, &identities.registry, &self.matcher, &self.ledger, at)?;
        match &outcome {
            CheckIn::Marked { identity, distance, .. } => {
                tracing::info!(%identity, distance, "attendance marked")
            }
            CheckIn::Duplicate { identity, .. } => tracing::info!(%identity, "already marked today"),
            other => tracing::debug!(outcome = ?other, "check-in not marked"),
        }
        Ok(outcome)
    }

    /// Append one embedding for a rostered student.
    pub fn enroll(&self, student_id: &str, name: &str, image: &str) -> Result<Enrollment, DeskError> {
        let student = Student {
            student_id: student_id.trim().to_string(),
            name: name.trim().to_string(),
        };
        let identity = student.identity_key();
        if !self.roster.contains_identity(&identity)? {
            return Err(DeskError::UnknownIdentity(identity));
        }

        let frame = decode_image(image)?;
        let embedding = match self.analyze(&frame)? {
            FaceCapture::Single(embedding) => embedding,
            FaceCapture::NoFace => return Err(DeskError::NoFace),
            FaceCapture::MultipleFaces(n) => return Err(DeskError::MultipleFaces(n)),
        };

        let mut guard = self.identities();
        let Identities { registry, store } = &mut *guard;
        let encodings = store.enroll(registry, &identity, embedding)?;
        Ok(Enrollment { identity, encodings })
    }

    pub fn add_student(&self, student_id: &str, name: &str) -> Result<AddOutcome, DeskError> {
        Ok(self.roster.add(student_id, name)?)
    }

    pub fn students(&self) -> Result<Vec<Student>, DeskError> {
        Ok(self.roster.list()?)
    }

    pub fn records(&self) -> Result<Vec<AttendanceRecord>, DeskError> {
        Ok(self.ledger.records()?)
    }

    pub fn history(&self, query: &str) -> Result<HistoryLookup, DeskError> {
        Ok(self.ledger.history(query)?)
    }

    pub fn status(&self, gate: &GateSnapshot) -> SystemStatus {
        let identities = self.identities();
        SystemStatus {
            enrolled_identities: identities.registry.enrolled_count(),
            total_encodings: identities.registry.total_embeddings(),
            ledger_format: self.ledger.format(),
            handed_off: gate.handed_off,
        }
    }

    fn analyze(&self, frame: &Frame) -> Result<FaceCapture, DeskError> {
        let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(analyzer.analyze(frame)?)
    }

    fn identities(&self) -> MutexGuard<'_, Identities> {
        self.identities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decode a base64 payload, optionally wrapped in a `data:` URL, into an
/// RGB frame.
pub fn decode_image(payload: &str) -> Result<Frame, DeskError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| DeskError::InvalidImage("data URL has no payload".into()))?,
        None => payload,
    };
    if encoded.is_empty() {
        return Err(DeskError::InvalidImage("empty image".into()));
    }

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| DeskError::InvalidImage(format!("bad base64: {e}")))?;
    let rgb = image::load_from_memory(&bytes)
        .map_err(|e| DeskError::InvalidImage(e.to_string()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::rgb(rgb.into_raw(), width, height).map_err(|e| DeskError::InvalidImage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use rollcall_core::Embedding;
    use std::io::Cursor;

    /// Reads the face "identity" from the red channel of the top-left pixel:
    /// 0 means no face, 255 means two faces, anything else one face.
    struct PixelAnalyzer;

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, frame: &Frame) -> Result<FaceCapture, AnalyzerError> {
            let red = frame.data[0];
            Ok(match red {
                0 => FaceCapture::NoFace,
                255 => FaceCapture::MultipleFaces(2),
                v => FaceCapture::Single(Embedding::new(vec![v as f32 / 255.0, 0.0, 0.0])),
            })
        }
    }

    fn png(red: u8) -> String {
        let img = RgbImage::from_pixel(8, 8, Rgb([red, 10, 10]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        STANDARD.encode(bytes.into_inner())
    }

    fn desk(dir: &std::path::Path) -> AttendanceDesk {
        AttendanceDesk::new(
            Box::new(PixelAnalyzer),
            RegistryStore::open(&dir.join("faces.db")).unwrap(),
            Roster::open(dir.join("students.csv")).unwrap(),
            AttendanceLedger::open(dir).unwrap(),
            IdentityMatcher::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_enroll_then_check_in() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path());
        desk.add_student("7", "Alice").unwrap();

        let enrolled = desk.enroll("7", "Alice", &png(100)).unwrap();
        assert_eq!(enrolled.identity, "Alice_7");
        assert_eq!(enrolled.encodings, 1);

        let outcome = desk.check_in_image(&format!("data:image/png;base64,{}", png(100))).unwrap();
        assert!(matches!(outcome, CheckIn::Marked { ref identity, .. } if identity == "Alice_7"));
        let again = desk.check_in_image(&png(100)).unwrap();
        assert!(matches!(again, CheckIn::Duplicate { .. }));
        assert_eq!(desk.records().unwrap().len(), 1);
    }

    #[test]
    fn test_enrollment_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let desk = desk(dir.path());
            desk.add_student("7", "Alice").unwrap();
            desk.enroll("7", "Alice", &png(100)).unwrap();
            desk.enroll("7", "Alice", &png(101)).unwrap();
        }
        let desk = desk(dir.path());
        let status = desk.status(&GateSnapshot {
            compliance_a: false,
            compliance_b: false,
            stable: false,
            passed: false,
            consecutive_hits: 0,
            handed_off: true,
        });
        assert_eq!(status.enrolled_identities, 1);
        assert_eq!(status.total_encodings, 2);
        assert!(status.handed_off);
    }

    #[test]
    fn test_enroll_requires_roster_and_one_face() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path());
        assert!(matches!(
            desk.enroll("9", "Nobody", &png(100)),
            Err(DeskError::UnknownIdentity(ref key)) if key == "Nobody_9"
        ));

        desk.add_student("9", "Nobody").unwrap();
        assert!(matches!(desk.enroll("9", "Nobody", &png(0)), Err(DeskError::NoFace)));
        assert!(matches!(desk.enroll("9", "Nobody", &png(255)), Err(DeskError::MultipleFaces(2))));
    }

    #[test]
    fn test_unrecognised_face_is_not_marked() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path());
        assert_eq!(desk.check_in_image(&png(100)).unwrap(), CheckIn::NoCandidates);

        desk.add_student("7", "Alice").unwrap();
        desk.enroll("7", "Alice", &png(20)).unwrap();
        let outcome = desk.check_in_image(&png(230)).unwrap();
        assert!(matches!(outcome, CheckIn::Unrecognized { .. }));
        assert!(desk.records().unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image("not base64!"), Err(DeskError::InvalidImage(_))));
        assert!(matches!(decode_image(""), Err(DeskError::InvalidImage(_))));
        assert!(matches!(decode_image("data:image/png;base64"), Err(DeskError::InvalidImage(_))));
        let not_an_image = STANDARD.encode(b"plain text");
        assert!(matches!(decode_image(&not_an_image), Err(DeskError::InvalidImage(_))));

        let frame = decode_image(&png(40)).unwrap();
        assert_eq!((frame.width, frame.height), (8, 8));
    }
}

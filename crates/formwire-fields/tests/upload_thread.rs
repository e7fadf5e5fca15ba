#![forbid(unsafe_code)]

//! Uploads run on worker threads; completions are applied on the bus thread.

use std::sync::Arc;
use std::sync::mpsc;

use formwire_core::Bus;
use formwire_fields::{
    FieldKind, FieldSpec, MockUploader, UploadField, UploadFile, UploadOutcome, UploadStart,
    Uploader, spawn_upload,
};

fn ticket(start: UploadStart) -> formwire_fields::UploadTicket {
    match start {
        UploadStart::Started(ticket) => ticket,
        UploadStart::TooLarge => panic!("upload should have started"),
    }
}

#[test]
fn superseded_upload_never_wins() {
    let bus = Bus::new();
    let form = bus.root_scope();
    let mut pdf = UploadField::mount(&bus, &form, FieldSpec::new("pdf", FieldKind::Upload)).unwrap();
    let uploader: Arc<dyn Uploader> = Arc::new(MockUploader::new());
    let (tx, rx) = mpsc::channel();

    let first_file = UploadFile::new("draft.pdf", 100);
    let second_file = UploadFile::new("final.pdf", 100);
    let first = ticket(pdf.begin(&first_file).unwrap());
    let second = ticket(pdf.begin(&second_file).unwrap());

    let handles = vec![
        spawn_upload(Arc::clone(&uploader), first, first_file, tx.clone()),
        spawn_upload(Arc::clone(&uploader), second, second_file, tx),
    ];
    for handle in handles {
        handle.join().unwrap();
    }

    let mut outcomes: Vec<_> = rx
        .iter()
        .map(|completion| (completion.ticket, pdf.complete(completion).unwrap()))
        .collect();
    outcomes.sort_by_key(|(ticket, _)| *ticket);

    assert_eq!(
        outcomes,
        vec![(first, UploadOutcome::Stale), (second, UploadOutcome::Attached)]
    );
    assert_eq!(pdf.receipt().map(|r| r.filename.as_str()), Some("final.pdf"));
    assert!(pdf.valid());
}

#[test]
fn removing_attachment_invalidates_field() {
    let bus = Bus::new();
    let form = bus.root_scope();
    let mut pdf = UploadField::mount(&bus, &form, FieldSpec::new("pdf", FieldKind::Upload)).unwrap();
    let (tx, rx) = mpsc::channel();

    let file = UploadFile::new("order.pdf", 100);
    let started = ticket(pdf.begin(&file).unwrap());
    spawn_upload(Arc::new(MockUploader::new()), started, file, tx)
        .join()
        .unwrap();
    let completion = rx.recv().unwrap();
    assert_eq!(pdf.complete(completion).unwrap(), UploadOutcome::Attached);

    pdf.remove_attachment().unwrap();
    assert!(!pdf.valid());
    assert!(!pdf.has_attachment());
}

#[test]
fn optional_upload_is_valid_when_empty() {
    let bus = Bus::new();
    let form = bus.root_scope();
    let pdf = UploadField::mount(
        &bus,
        &form,
        FieldSpec::new("supporting_docs", FieldKind::Upload).optional(true),
    )
    .unwrap();
    assert!(pdf.valid());
}

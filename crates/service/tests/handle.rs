mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use parking_lot::Mutex;
use rtp_translator_service::{
    Error, Packet, StreamKind,
    format::Format,
    handle::StreamHandle,
    session::*,
    translator::{Translator, TranslatorOptions},
};

use common::*;

#[test]
fn test_unattached_handle() -> Result<()> {
    let connector = MemoryConnector::new();
    let session = Session::new(SessionOptions {
        local_ssrc: Some(5555),
        ..Default::default()
    });

    let handle = StreamHandle::new(session.clone(), connector.clone())?;
    assert!(!handle.is_attached());
    assert_eq!(handle.stream_id(), None);
    assert_eq!(handle.local_ssrc(), 5555);

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_ = events.clone();
    handle.add_receive_stream_listener(Arc::new(move |event: &ReceiveStreamEvent| {
        events_.lock().push(*event)
    }))?;

    handle.add_format(0, Format::new("PCMU", 8000))?;
    assert_eq!(session.format(0), Some(Format::new("pcmu", 8000)));

    connector.data_input.inject(&rtp(1111, 0, 1, &[0]));
    assert_eq!(
        *events.lock(),
        vec![ReceiveStreamEvent::NewReceiveStream { ssrc: 1111 }]
    );
    assert_eq!(handle.receive_streams()?, vec![1111]);

    let written = Arc::new(Mutex::new(Vec::new()));
    let written_ = written.clone();
    handle.add_packet_listener(Arc::new(move |kind: StreamKind, packet: &Packet| {
        written_.lock().push((kind, packet.ssrc().ok()));
    }))?;

    let stream = handle.create_send_stream(DataSourceId(1), 0)?;
    stream.start()?;
    stream.write(0, &[0xff; 160], 0, false)?;

    let packet = Packet::new(&connector.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
    assert_eq!(packet.ssrc()?, 5555);
    assert_eq!(packet.payload_length()?, 160);
    assert_eq!(*written.lock(), vec![(StreamKind::Data, Some(5555))]);
    assert_eq!(handle.send_streams()?.len(), 1);
    assert_eq!(handle.stats().sent_packets, 1);

    handle.dispose();
    handle.dispose();
    assert!(connector.is_closed());
    assert!(matches!(handle.receive_streams(), Err(Error::Disposed)));
    assert!(matches!(
        session.create_send_stream(DataSourceId(1), 0),
        Err(Error::Disposed)
    ));

    Ok(())
}

#[test]
fn test_attached_handles_end_to_end() -> Result<()> {
    let session = Session::new(SessionOptions::default());
    let translator = Translator::new(session, TranslatorOptions::default())?;

    let c1 = MemoryConnector::new();
    let c2 = MemoryConnector::new();
    let h1 = StreamHandle::with_translator(&translator, c1.clone())?;
    let h2 = StreamHandle::with_translator(&translator, c2.clone())?;
    assert!(h1.is_attached());
    assert_eq!(h1.local_ssrc(), h2.local_ssrc());

    let id1 = h1.stream_id().ok_or(anyhow::anyhow!("not attached"))?;
    let id2 = h2.stream_id().ok_or(anyhow::anyhow!("not attached"))?;
    assert_ne!(id1, id2);

    let h264 = Format::new("H264", 90000);
    h1.add_format(97, h264.clone())?;
    h2.add_format(100, h264)?;

    let (h1_events, h2_events) = (Arc::new(Mutex::new(Vec::new())), Arc::new(Mutex::new(Vec::new())));
    for (handle, events) in [(&h1, &h1_events), (&h2, &h2_events)] {
        let events_ = events.clone();
        handle.add_receive_stream_listener(Arc::new(move |event: &ReceiveStreamEvent| {
            events_.lock().push(*event)
        }))?;
    }

    let claimed_before_delivery = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = crossbeam_channel::unbounded();
    {
        let translator = translator.clone();
        let claimed_before_delivery = claimed_before_delivery.clone();

        h2.add_packet_listener(Arc::new(move |kind: StreamKind, packet: &Packet| {
            let claimed = translator
                .claimed_ssrcs(id1)
                .is_ok_and(|it| it.contains(&1111))
                && translator
                    .claimed_ssrcs(id2)
                    .is_ok_and(|it| !it.contains(&1111));

            claimed_before_delivery.store(claimed, Ordering::Relaxed);
            let _ = sender.send((kind, packet.ssrc().ok(), packet.payload_type().ok()));
        }))?;
    }

    c1.data_input.inject(&rtp(1111, 97, 1, &[0xca, 0xfe]));

    assert_eq!(
        receiver.recv_timeout(WAIT)?,
        (StreamKind::Data, Some(1111), Some(100))
    );
    assert!(receiver.recv_timeout(SILENCE).is_err());
    assert!(claimed_before_delivery.load(Ordering::Relaxed));

    let forwarded = Packet::new(&c2.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
    assert_eq!(forwarded.payload()?, &[0xca, 0xfe]);
    assert!(c1.data_output.is_silent());

    assert_eq!(
        *h1_events.lock(),
        vec![ReceiveStreamEvent::NewReceiveStream { ssrc: 1111 }]
    );
    assert!(h2_events.lock().is_empty());
    assert_eq!(h1.receive_streams()?, vec![1111]);
    assert!(h2.receive_streams()?.is_empty());

    let s1 = h1.create_send_stream(DataSourceId(42), 0)?;
    let s2 = h2.create_send_stream(DataSourceId(42), 0)?;
    assert_eq!(s1.ssrc(), s2.ssrc());
    assert_eq!(h1.send_streams()?.len(), 1);

    h2.dispose();
    assert!(c2.is_closed());
    assert_eq!(translator.streams(), vec![id1]);
    assert!(matches!(h2.send_streams(), Err(Error::Disposed)));

    c1.data_input.inject(&rtp(1111, 97, 2, &[0]));
    assert!(receiver.recv_timeout(SILENCE).is_err());

    translator.dispose();
    h1.dispose();
    assert!(c1.is_closed());
    Ok(())
}

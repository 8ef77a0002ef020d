mod common;

use std::{sync::Arc, thread};

use anyhow::Result;
use parking_lot::Mutex;
use rtp_translator_service::{
    Packet, StreamKind,
    format::Format,
    session::*,
    translator::{Translator, TranslatorOptions},
};

use common::*;

fn translator() -> Result<(Arc<Session>, Arc<Translator>)> {
    let session = Session::new(SessionOptions {
        local_ssrc: Some(9999),
        ..Default::default()
    });

    let translator = Translator::new(session.clone(), TranslatorOptions::default())?;
    Ok((session, translator))
}

fn events() -> (Arc<Mutex<Vec<ReceiveStreamEvent>>>, Arc<dyn ReceiveStreamListener>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_ = events.clone();

    let listener: Arc<dyn ReceiveStreamListener> =
        Arc::new(move |event: &ReceiveStreamEvent| events_.lock().push(*event));

    (events, listener)
}

#[test]
fn test_loop_avoidance() -> Result<()> {
    let (_, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let packet = rtp(1111, 97, 1, &[1, 2, 3]);
    a.data_input.inject(&packet);

    assert_eq!(b.data_output.recv(), Some(packet.clone()));
    assert!(a.data_output.is_silent());

    assert_eq!(translator.claimed_ssrcs(a_id)?, vec![1111]);
    assert!(translator.claimed_ssrcs(b_id)?.is_empty());

    // The forwarded packet looped back by the remote end of B.
    b.data_input.inject(&packet);
    assert!(a.data_output.is_silent());
    assert!(b.data_output.is_silent());

    let counters = translator.counters();
    assert_eq!(counters.forwarded, 1);
    assert_eq!(counters.echoes_dropped, 1);

    translator.dispose();
    Ok(())
}

#[test]
fn test_fan_out_to_every_other_stream() -> Result<()> {
    let (_, translator) = translator()?;
    let connectors = (0..4).map(|_| MemoryConnector::new()).collect::<Vec<_>>();
    for connector in &connectors {
        translator.attach(connector.clone())?;
    }

    let packet = rtp(1111, 0, 7, &[0xff; 160]);
    connectors[2].data_input.inject(&packet);

    for (index, connector) in connectors.iter().enumerate() {
        if index == 2 {
            assert!(connector.data_output.is_silent());
        } else {
            assert_eq!(connector.data_output.recv(), Some(packet.clone()));
        }
    }

    let report = receiver_report(1111, 2222);
    connectors[2].control_input.inject(&report);

    for (index, connector) in connectors.iter().enumerate() {
        if index == 2 {
            assert!(connector.control_output.is_silent());
        } else {
            assert_eq!(connector.control_output.recv(), Some(report.clone()));
        }
    }

    translator.dispose();
    Ok(())
}

#[test]
fn test_payload_type_remap() -> Result<()> {
    let (_, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();
    let c = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;
    translator.attach(c.clone())?;

    let vp8 = Format::new("VP8", 90000);
    translator.add_format(a_id, 97, vp8.clone())?;
    translator.add_format(b_id, 100, vp8)?;

    let payload = [0x10, 0x20, 0x30, 0x40];
    let mut packet = Packet::new(&rtp(1111, 97, 1, &payload));
    packet.set_marker(true)?;
    a.data_input.inject(packet.as_bytes());

    let forwarded = Packet::new(&b.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
    assert_eq!(forwarded.payload_type()?, 100);
    assert!(forwarded.is_marker()?);
    assert_eq!(forwarded.ssrc()?, 1111);
    assert_eq!(forwarded.payload()?, &payload);

    // No mapping for the format, the source payload type is kept.
    let unmapped = Packet::new(&c.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
    assert_eq!(unmapped.payload_type()?, 97);
    assert_eq!(unmapped.payload()?, &payload);

    translator.dispose();
    Ok(())
}

#[test]
fn test_remap_with_several_numbers_for_one_format() -> Result<()> {
    let (session, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let vp8 = Format::new("VP8", 90000);
    translator.add_format(a_id, 96, vp8.clone())?;
    translator.add_format(a_id, 97, vp8.clone())?;
    translator.add_format(b_id, 100, vp8.clone())?;
    translator.add_format(b_id, 101, vp8.clone())?;

    for (pt, sequence_number) in [(96, 1), (97, 2)] {
        a.data_input.inject(&rtp(1111, pt, sequence_number, &[pt]));

        let forwarded = Packet::new(&b.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
        assert_eq!(forwarded.payload_type()?, 100);
        assert_eq!(forwarded.payload()?, &[pt]);
    }

    // Mappings of other streams do not replace each other in the shared
    // session.
    for pt in [96, 97, 100, 101] {
        assert_eq!(session.format(pt), Some(vp8.clone()));
    }

    translator.dispose();
    Ok(())
}

#[test]
fn test_event_routing() -> Result<()> {
    let (session, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let (a_events, a_listener) = events();
    let (b_events, b_listener) = events();
    translator.add_receive_stream_listener(a_id, a_listener)?;
    translator.add_receive_stream_listener(b_id, b_listener.clone())?;

    a.data_input.inject(&rtp(1111, 97, 1, &[0]));
    a.data_input.inject(&rtp(1111, 97, 2, &[0]));
    b.data_input.inject(&rtp(2222, 97, 1, &[0]));

    // A report sent by 1111 reaches the session through B's control input,
    // it is still routed to the stream that claims 1111.
    b.control_input.inject(&receiver_report(1111, 2222));

    assert_eq!(
        *a_events.lock(),
        vec![
            ReceiveStreamEvent::NewReceiveStream { ssrc: 1111 },
            ReceiveStreamEvent::Report { ssrc: 1111 },
        ]
    );

    assert_eq!(
        *b_events.lock(),
        vec![ReceiveStreamEvent::NewReceiveStream { ssrc: 2222 }]
    );

    assert_eq!(translator.receive_streams(a_id)?, vec![1111]);
    assert_eq!(translator.receive_streams(b_id)?, vec![2222]);
    assert_eq!(session.receive_streams(), vec![1111, 2222]);

    b.control_input.inject(&bye(2222));
    assert_eq!(
        b_events.lock().last(),
        Some(&ReceiveStreamEvent::Bye { ssrc: 2222 })
    );
    assert!(translator.claimed_ssrcs(b_id)?.is_empty());

    translator.remove_receive_stream_listener(b_id, &b_listener)?;
    b.data_input.inject(&rtp(3333, 97, 1, &[0]));
    assert_eq!(b_events.lock().len(), 2);

    translator.dispose();
    Ok(())
}

#[test]
fn test_malformed_packets_are_dropped() -> Result<()> {
    let (_, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    translator.attach(a.clone())?;
    translator.attach(b.clone())?;

    a.data_input.inject(&[0x80, 0x60, 0x00]);
    a.control_input.inject(&[0x81, 0xc9]);

    assert!(b.data_output.is_silent());
    assert!(b.control_output.is_silent());
    assert_eq!(translator.counters().malformed, 2);

    translator.dispose();
    Ok(())
}

#[test]
fn test_send_stream_sharing() -> Result<()> {
    let (session, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let source = DataSourceId(1);
    let a_stream = translator.create_send_stream(a_id, source, 0)?;
    let b_stream = translator.create_send_stream(b_id, source, 0)?;

    assert!(Arc::ptr_eq(&a_stream, &translator.create_send_stream(a_id, source, 0)?));
    assert!(!Arc::ptr_eq(&a_stream, &b_stream));
    assert_eq!(a_stream.ssrc(), 9999);
    assert_eq!(b_stream.ssrc(), 9999);
    assert_eq!(session.send_streams().len(), 1);
    assert_eq!(translator.send_streams(a_id)?.len(), 1);

    let underlying = session.send_streams()[0].clone();
    assert!(!underlying.is_started());

    a_stream.start()?;
    b_stream.start()?;
    assert!(underlying.is_started());

    // Packets of the shared session go to every connector, no exclusion.
    a_stream.write(111, &[0xab], 0, false)?;
    for connector in [&a, &b] {
        let packet = Packet::new(&connector.data_output.recv().ok_or(anyhow::anyhow!("no packet"))?);
        assert_eq!(packet.ssrc()?, 9999);
        assert_eq!(packet.payload_type()?, 111);
        assert_eq!(packet.payload()?, &[0xab]);
    }

    a_stream.stop()?;
    assert!(underlying.is_started());
    assert_eq!(a_stream.write(111, &[0xab], 0, false)?, 0);

    // Stop without a matching start.
    a_stream.stop()?;
    assert!(underlying.is_started());

    b_stream.stop()?;
    assert!(!underlying.is_started());

    a_stream.close();
    assert!(matches!(
        a_stream.start(),
        Err(rtp_translator_service::Error::SendStreamClosed)
    ));
    assert_eq!(session.send_streams().len(), 1);

    b_stream.close();
    assert!(session.send_streams().is_empty());

    let c_stream = translator.create_send_stream(b_id, source, 0)?;
    assert!(!Arc::ptr_eq(&c_stream, &b_stream));
    assert_eq!(session.send_streams().len(), 1);

    translator.dispose();
    Ok(())
}

#[test]
fn test_recreate_while_last_wrapper_closes() -> Result<()> {
    let (session, translator) = translator()?;
    let ids = [
        translator.attach(MemoryConnector::new())?,
        translator.attach(MemoryConnector::new())?,
    ];

    let workers = ids
        .into_iter()
        .map(|id| {
            let translator = translator.clone();
            thread::spawn(move || -> Result<(), rtp_translator_service::Error> {
                for _ in 0..500 {
                    let stream = translator.create_send_stream(id, DataSourceId(3), 0)?;
                    stream.start()?;
                    stream.close();
                }

                Ok(())
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))??;
    }

    assert!(translator.send_streams(ids[0])?.is_empty());
    assert!(translator.send_streams(ids[1])?.is_empty());
    assert!(session.send_streams().is_empty());

    translator.dispose();
    Ok(())
}

#[test]
fn test_detach() -> Result<()> {
    let (_, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let b_stream = translator.create_send_stream(b_id, DataSourceId(7), 1)?;
    b_stream.start()?;

    translator.detach(b_id)?;
    assert!(b.is_closed());
    assert!(b_stream.is_closed());
    assert_eq!(translator.streams().len(), 1);

    a.data_input.inject(&rtp(1111, 97, 1, &[0]));
    assert!(b.data_output.is_silent());

    assert!(matches!(
        translator.detach(b_id),
        Err(rtp_translator_service::Error::UnknownStream)
    ));
    assert!(translator.claimed_ssrcs(b_id).is_err());

    translator.dispose();
    assert!(a.is_closed());
    assert!(matches!(
        translator.attach(MemoryConnector::new()),
        Err(rtp_translator_service::Error::Disposed)
    ));

    Ok(())
}

#[test]
fn test_packet_listener_observes_rewritten_packet() -> Result<()> {
    let (_, translator) = translator()?;
    let a = MemoryConnector::new();
    let b = MemoryConnector::new();

    let a_id = translator.attach(a.clone())?;
    let b_id = translator.attach(b.clone())?;

    let opus = Format::with_channels("opus", 48000, 2);
    translator.add_format(a_id, 111, opus.clone())?;
    translator.add_format(b_id, 96, opus)?;

    let (sender, receiver) = crossbeam_channel::unbounded();
    translator.add_packet_listener(
        b_id,
        Arc::new(move |kind: StreamKind, packet: &Packet| {
            let _ = sender.send((kind, packet.payload_type().ok()));
        }),
    )?;

    a.data_input.inject(&rtp(1111, 111, 1, &[1]));

    assert_eq!(receiver.recv_timeout(WAIT)?, (StreamKind::Data, Some(96)));
    assert!(receiver.recv_timeout(SILENCE).is_err());

    translator.dispose();
    Ok(())
}

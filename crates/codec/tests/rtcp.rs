use anyhow::Result;
use rtp_translator_codec::{
    Error,
    rtcp::{PacketType, RtcpIter, ssrcs},
};

#[rustfmt::skip]
const COMPOUND: &[u8] = &[
    // SR, one report block
    0x81, 0xc8, 0x00, 0x0c, 0x00, 0x00, 0x04, 0x57,
    0xe3, 0x4a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x0a,
    0x00, 0x00, 0x06, 0x40,
    0x00, 0x00, 0x08, 0xae, 0x00, 0x00, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x05,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // SDES, one empty chunk
    0x81, 0xca, 0x00, 0x01, 0x00, 0x00, 0x04, 0x57,
    // BYE, two sources
    0x82, 0xcb, 0x00, 0x02, 0x00, 0x00, 0x04, 0x57,
    0x00, 0x00, 0x0d, 0x05,
];

#[test]
fn test_compound_walk() -> Result<()> {
    let packets = RtcpIter::new(COMPOUND).collect::<Result<Vec<_>, _>>()?;
    assert_eq!(packets.len(), 3);

    let sender_report = &packets[0];
    assert_eq!(sender_report.version(), 2);
    assert_eq!(sender_report.packet_type(), Some(PacketType::SenderReport));
    assert_eq!(sender_report.count(), 1);
    assert_eq!(sender_report.len(), 52);
    assert_eq!(sender_report.ssrc(), Some(1111));

    let blocks = sender_report.report_blocks()?;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].ssrc, 2222);
    assert_eq!(blocks[0].cumulative_lost, 1);
    assert_eq!(blocks[0].highest_sequence, 100);
    assert_eq!(blocks[0].jitter, 5);

    assert_eq!(packets[1].packet_type(), Some(PacketType::SourceDescription));
    assert!(packets[1].report_blocks()?.is_empty());

    assert_eq!(packets[2].packet_type(), Some(PacketType::Bye));
    assert_eq!(packets[2].bye_sources()?, vec![1111, 3333]);
    Ok(())
}

#[test]
fn test_ssrcs() -> Result<()> {
    assert_eq!(ssrcs(COMPOUND)?, vec![1111, 2222, 3333]);
    assert!(ssrcs(&[])?.is_empty());
    Ok(())
}

#[test]
fn test_malformed_compound() -> Result<()> {
    let mut iter = RtcpIter::new(&COMPOUND[..40]);
    assert!(matches!(iter.next(), Some(Err(Error::MalformedPacket))));
    assert!(iter.next().is_none());

    let mut bytes = COMPOUND.to_vec();
    bytes[52] = 0x41;
    let mut iter = RtcpIter::new(&bytes);
    assert!(iter.next().transpose()?.is_some());
    assert!(matches!(iter.next(), Some(Err(Error::InvalidVersion))));
    assert!(iter.next().is_none());

    let mut bytes = COMPOUND[..52].to_vec();
    bytes[0] = 0x82;
    let header = RtcpIter::new(&bytes).next().transpose()?;
    assert!(matches!(
        header.map(|it| it.report_blocks()),
        Some(Err(Error::MalformedPacket))
    ));
    Ok(())
}

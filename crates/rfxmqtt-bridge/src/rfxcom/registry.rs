//! Packet family and radio protocol tables

use crate::error::ProtocolError;

/// A packet family the transceiver understands
#[derive(Debug)]
pub struct Family {
    /// Family name used on topics (`lighting2`)
    pub name: &'static str,
    pub packet_type: u8,
    /// Whether the bridge can transmit this family
    pub transmit: bool,
    pub subtypes: &'static [(u8, &'static str)],
}

impl Family {
    pub fn subtype_name(&self, code: u8) -> Option<&'static str> {
        self.subtypes
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, name)| *name)
    }

    pub fn subtype_code(&self, name: &str) -> Option<u8> {
        self.subtypes
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(code, _)| *code)
    }

    /// First listed subtype, used when a device names none
    pub fn default_subtype(&self) -> u8 {
        self.subtypes.first().map(|(code, _)| *code).unwrap_or(0)
    }
}

pub const LIGHTING1: u8 = 0x10;
pub const LIGHTING2: u8 = 0x11;
pub const LIGHTING4: u8 = 0x13;
pub const LIGHTING5: u8 = 0x14;
pub const LIGHTING6: u8 = 0x15;
pub const CHIME1: u8 = 0x16;
pub const BLINDS1: u8 = 0x19;
pub const RFY: u8 = 0x1A;
pub const SECURITY1: u8 = 0x20;
pub const TEMP1: u8 = 0x50;
pub const HUMIDITY1: u8 = 0x51;
pub const TEMPHUMIDITY1: u8 = 0x52;

pub static FAMILIES: &[Family] = &[
    Family {
        name: "lighting1",
        packet_type: LIGHTING1,
        transmit: true,
        subtypes: &[
            (0x00, "X10"),
            (0x01, "ARC"),
            (0x02, "ELRO"),
            (0x03, "WAVEMAN"),
            (0x04, "CHACON"),
            (0x05, "IMPULS"),
            (0x06, "RISING_SUN"),
            (0x07, "PHILIPS_SBC"),
            (0x08, "ENERGENIE_ENER010"),
            (0x09, "ENERGENIE_5_GANG"),
            (0x0A, "COCO"),
            (0x0B, "HQ_COCO20"),
        ],
    },
    Family {
        name: "lighting2",
        packet_type: LIGHTING2,
        transmit: true,
        subtypes: &[
            (0x00, "AC"),
            (0x01, "HOMEEASY_EU"),
            (0x02, "ANSLUT"),
            (0x03, "KAMBROOK"),
        ],
    },
    Family {
        name: "lighting4",
        packet_type: LIGHTING4,
        transmit: true,
        subtypes: &[(0x00, "PT2262")],
    },
    Family {
        name: "lighting5",
        packet_type: LIGHTING5,
        transmit: true,
        subtypes: &[
            (0x00, "LIGHTWAVERF"),
            (0x01, "EMW100"),
            (0x02, "BBSB"),
            (0x03, "MDREMOTE"),
            (0x04, "CONRAD_RSL2"),
            (0x05, "LIVOLO"),
            (0x06, "TRC02"),
            (0x07, "AOKE"),
            (0x08, "TRC02_2"),
            (0x09, "EURODOMEST"),
            (0x0A, "LIVOLO_APPLIANCE"),
            (0x0B, "RGB432W"),
            (0x0C, "MDREMOTE_107"),
            (0x0D, "LEGRAND_CAD"),
            (0x0F, "IT"),
            (0x10, "MDREMOTE_108"),
            (0x11, "KANGTAI"),
        ],
    },
    Family {
        name: "lighting6",
        packet_type: LIGHTING6,
        transmit: true,
        subtypes: &[(0x00, "BLYSS"), (0x01, "CUVEO")],
    },
    Family {
        name: "chime1",
        packet_type: CHIME1,
        transmit: true,
        subtypes: &[
            (0x00, "BYRON_SX"),
            (0x01, "BYRON_MP001"),
            (0x02, "SELECT_PLUS"),
            (0x03, "SELECT_PLUS3"),
            (0x04, "ENVIVO"),
        ],
    },
    Family {
        name: "blinds1",
        packet_type: BLINDS1,
        transmit: true,
        subtypes: &[
            (0x00, "BLINDS_T0"),
            (0x01, "BLINDS_T1"),
            (0x02, "BLINDS_T2"),
            (0x03, "BLINDS_T3"),
            (0x04, "BLINDS_T4"),
            (0x05, "BLINDS_T5"),
            (0x06, "BLINDS_T6"),
            (0x07, "BLINDS_T7"),
            (0x08, "BLINDS_T8"),
        ],
    },
    Family {
        name: "rfy",
        packet_type: RFY,
        transmit: true,
        subtypes: &[(0x00, "RFY"), (0x01, "RFYEXT"), (0x03, "ASA")],
    },
    Family {
        name: "security1",
        packet_type: SECURITY1,
        transmit: false,
        subtypes: &[
            (0x00, "X10_DOOR"),
            (0x01, "X10_PIR"),
            (0x02, "X10_SECURITY"),
            (0x03, "KD101"),
            (0x04, "POWERCODE_SENSOR"),
            (0x05, "POWERCODE_MOTION"),
            (0x06, "CODESECURE"),
            (0x07, "POWERCODE_AUX"),
            (0x08, "MEIANTECH"),
            (0x09, "SA30"),
        ],
    },
    Family {
        name: "temp1",
        packet_type: TEMP1,
        transmit: false,
        subtypes: &[
            (0x01, "TEMP1"),
            (0x02, "TEMP2"),
            (0x03, "TEMP3"),
            (0x04, "TEMP4"),
            (0x05, "TEMP5"),
            (0x06, "TEMP6"),
            (0x07, "TEMP7"),
            (0x08, "TEMP8"),
            (0x09, "TEMP9"),
            (0x0A, "TEMP10"),
            (0x0B, "TEMP11"),
        ],
    },
    Family {
        name: "humidity1",
        packet_type: HUMIDITY1,
        transmit: false,
        subtypes: &[(0x01, "HUM1"), (0x02, "HUM2"), (0x03, "HUM3")],
    },
    Family {
        name: "temphumidity1",
        packet_type: TEMPHUMIDITY1,
        transmit: false,
        subtypes: &[
            (0x01, "TH1"),
            (0x02, "TH2"),
            (0x03, "TH3"),
            (0x04, "TH4"),
            (0x05, "TH5"),
            (0x06, "TH6"),
            (0x07, "TH7"),
            (0x08, "TH8"),
            (0x09, "TH9"),
            (0x0A, "TH10"),
            (0x0B, "TH11"),
            (0x0C, "TH12"),
            (0x0D, "TH13"),
            (0x0E, "TH14"),
        ],
    },
];

/// Family by name
pub fn family(name: &str) -> Option<&'static Family> {
    FAMILIES.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Family by packet type byte
pub fn family_by_packet_type(packet_type: u8) -> Option<&'static Family> {
    FAMILIES.iter().find(|f| f.packet_type == packet_type)
}

/// Subtype name for a protocol's numeric subtype
pub fn get_sub_type(protocol: &str, subtype: u8) -> Option<&'static str> {
    family(protocol).and_then(|f| f.subtype_name(subtype))
}

/// Whether a received command addresses a whole group
pub fn is_group(protocol: &str, command_number: u8) -> bool {
    match protocol {
        "lighting1" => matches!(command_number, 5 | 6),
        "lighting2" => matches!(command_number, 3 | 4),
        "lighting6" => matches!(command_number, 2 | 3),
        _ => false,
    }
}

/// A receiver protocol switched by the set-mode bitmaps
#[derive(Debug)]
pub struct RadioProtocol {
    pub name: &'static str,
    /// Bitmap index: 0 = msg3, 1 = msg4, 2 = msg5
    pub msg: usize,
    pub bit: u8,
}

pub static RADIO_PROTOCOLS: &[RadioProtocol] = &[
    RadioProtocol { name: "UNDECODED", msg: 0, bit: 0x80 },
    RadioProtocol { name: "IMAGINTRONIX", msg: 0, bit: 0x40 },
    RadioProtocol { name: "BYRONSX", msg: 0, bit: 0x20 },
    RadioProtocol { name: "RSL", msg: 0, bit: 0x10 },
    RadioProtocol { name: "LIGHTING4", msg: 0, bit: 0x08 },
    RadioProtocol { name: "FINEOFFSET", msg: 0, bit: 0x04 },
    RadioProtocol { name: "RUBICSON", msg: 0, bit: 0x02 },
    RadioProtocol { name: "AE", msg: 0, bit: 0x01 },
    RadioProtocol { name: "BLINDST1", msg: 1, bit: 0x80 },
    RadioProtocol { name: "BLINDST0", msg: 1, bit: 0x40 },
    RadioProtocol { name: "PROGUARD", msg: 1, bit: 0x20 },
    RadioProtocol { name: "FS20", msg: 1, bit: 0x10 },
    RadioProtocol { name: "LACROSSE", msg: 1, bit: 0x08 },
    RadioProtocol { name: "HIDEKI", msg: 1, bit: 0x04 },
    RadioProtocol { name: "LIGHTWAVERF", msg: 1, bit: 0x02 },
    RadioProtocol { name: "MERTIK", msg: 1, bit: 0x01 },
    RadioProtocol { name: "VISONIC", msg: 2, bit: 0x80 },
    RadioProtocol { name: "ATI", msg: 2, bit: 0x40 },
    RadioProtocol { name: "OREGON", msg: 2, bit: 0x20 },
    RadioProtocol { name: "MEIANTECH", msg: 2, bit: 0x10 },
    RadioProtocol { name: "HOMEEASY", msg: 2, bit: 0x08 },
    RadioProtocol { name: "AC", msg: 2, bit: 0x04 },
    RadioProtocol { name: "ARC", msg: 2, bit: 0x02 },
    RadioProtocol { name: "X10", msg: 2, bit: 0x01 },
];

/// Set-mode bitmaps enabling exactly the named protocols
pub fn protocol_bits<S: AsRef<str>>(names: &[S]) -> Result<[u8; 3], ProtocolError> {
    let mut bits = [0u8; 3];
    for name in names {
        let name = name.as_ref();
        let protocol = RADIO_PROTOCOLS
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ProtocolError::UnknownRadioProtocol(name.to_string()))?;
        bits[protocol.msg] |= protocol.bit;
    }
    Ok(bits)
}

/// Names of the protocols enabled in a status response
pub fn enabled_protocols(bits: [u8; 3]) -> Vec<String> {
    RADIO_PROTOCOLS
        .iter()
        .filter(|p| bits[p.msg] & p.bit != 0)
        .map(|p| p.name.to_string())
        .collect()
}

/// Receiver type from the status response
pub fn receiver_type_name(code: u8) -> String {
    match code {
        0x50 => "310MHz".to_string(),
        0x51 => "315MHz".to_string(),
        0x52 => "433.92MHz receiver only".to_string(),
        0x53 => "433.92MHz transceiver".to_string(),
        0x55 => "868.00MHz".to_string(),
        0x56 => "868.00MHz FSK".to_string(),
        0x57 => "868.30MHz".to_string(),
        0x58 => "868.30MHz FSK".to_string(),
        0x59 => "868.35MHz".to_string(),
        0x5A => "868.35MHz FSK".to_string(),
        0x5B => "868.95MHz".to_string(),
        other => format!("unknown (0x{:02X})", other),
    }
}

/// Firmware type from the status response
pub fn firmware_type_name(code: u8) -> String {
    match code {
        0x00 => "Type1 RFXrec".to_string(),
        0x01 => "Type1".to_string(),
        0x02 => "Type2".to_string(),
        0x03 => "Ext".to_string(),
        0x04 => "Ext2".to_string(),
        0x05 => "Pro1".to_string(),
        0x06 => "Pro2".to_string(),
        0x10 => "ProXL1".to_string(),
        other => format!("unknown (0x{:02X})", other),
    }
}

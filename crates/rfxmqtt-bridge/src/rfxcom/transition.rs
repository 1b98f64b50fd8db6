//! Free-text command words
//!
//! Hub-facing commands arrive as plain words (`on`, `group off`,
//! `level 5`, `mood2`). Each family maps them to a command number and the
//! handler function that performs it.

/// How a word takes its numeric argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    None,
    Fixed(i64),
    Required,
    Optional,
}

struct Word {
    text: &'static str,
    number: u8,
    function: &'static str,
    label: &'static str,
    arg: Arg,
    group: bool,
}

const fn word(text: &'static str, number: u8, function: &'static str, label: &'static str) -> Word {
    Word {
        text,
        number,
        function,
        label,
        arg: Arg::None,
        group: false,
    }
}

const fn group(text: &'static str, number: u8, function: &'static str, label: &'static str) -> Word {
    Word {
        text,
        number,
        function,
        label,
        arg: Arg::None,
        group: true,
    }
}

const fn with_arg(text: &'static str, number: u8, function: &'static str, label: &'static str, arg: Arg) -> Word {
    Word {
        text,
        number,
        function,
        label,
        arg,
        group: false,
    }
}

static LIGHTING1: &[Word] = &[
    word("off", 0, "switchOff", "Off"),
    word("on", 1, "switchOn", "On"),
    word("dim", 2, "dim", "Dim"),
    word("bright", 3, "bright", "Bright"),
    group("group off", 5, "switchOff", "All Off"),
    group("group on", 6, "switchOn", "All On"),
    word("chime", 7, "chime", "Chime"),
];

static LIGHTING2: &[Word] = &[
    word("off", 0, "switchOff", "Off"),
    word("on", 1, "switchOn", "On"),
    with_arg("level", 2, "setLevel", "Set Level", Arg::Required),
    group("group on", 3, "switchOn", "Group On"),
    group("group off", 4, "switchOff", "Group Off"),
];

static LIGHTING4: &[Word] = &[
    with_arg("send", 0, "sendData", "Data", Arg::Optional),
    with_arg("on", 0, "sendData", "Data", Arg::Optional),
];

static LIGHTING5: &[Word] = &[
    word("off", 0, "switchOff", "Off"),
    word("on", 1, "switchOn", "On"),
    group("group off", 2, "switchOff", "Group Off"),
    with_arg("mood1", 3, "setMood", "Mood1", Arg::Fixed(1)),
    with_arg("mood2", 4, "setMood", "Mood2", Arg::Fixed(2)),
    with_arg("mood3", 5, "setMood", "Mood3", Arg::Fixed(3)),
    with_arg("mood4", 6, "setMood", "Mood4", Arg::Fixed(4)),
    with_arg("mood5", 7, "setMood", "Mood5", Arg::Fixed(5)),
    with_arg("level", 0x10, "setLevel", "Set Level", Arg::Required),
];

static LIGHTING6: &[Word] = &[
    word("on", 0, "switchOn", "On"),
    word("off", 1, "switchOff", "Off"),
    group("group on", 2, "switchOn", "Group On"),
    group("group off", 3, "switchOff", "Group Off"),
];

static CHIME1: &[Word] = &[
    with_arg("chime", 0, "chime", "Chime", Arg::Optional),
    with_arg("ring", 0, "chime", "Chime", Arg::Optional),
];

static BLINDS1: &[Word] = &[
    word("open", 0, "open", "Open"),
    word("close", 1, "close", "Close"),
    word("stop", 2, "stop", "Stop"),
    word("confirm", 3, "confirm", "Confirm"),
    word("limit", 4, "setLimit", "Set Limit"),
    word("tilt up", 7, "tiltUp", "Tilt Up"),
    word("tilt down", 8, "tiltDown", "Tilt Down"),
];

static RFY: &[Word] = &[
    word("stop", 0, "stop", "Stop"),
    word("up", 1, "up", "Up"),
    word("open", 1, "up", "Up"),
    word("down", 3, "down", "Down"),
    word("close", 3, "down", "Down"),
    word("program", 7, "program", "Program"),
];

fn words(family: &str) -> Option<&'static [Word]> {
    Some(match family {
        "lighting1" => LIGHTING1,
        "lighting2" => LIGHTING2,
        "lighting4" => LIGHTING4,
        "lighting5" => LIGHTING5,
        "lighting6" => LIGHTING6,
        "chime1" => CHIME1,
        "blinds1" => BLINDS1,
        "rfy" => RFY,
        _ => return None,
    })
}

/// A resolved command word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub command_number: u8,
    /// Handler function performing the command
    pub function: &'static str,
    pub arg: Option<i64>,
    /// Whether the command addresses the whole group (unit 0)
    pub group: bool,
    /// Display name recorded in the entity state
    pub label: &'static str,
}

/// Map a free-text command to a transition for `family`
pub fn transition(family: &str, text: &str) -> Option<Transition> {
    let text = text.trim().to_ascii_lowercase();
    let table = words(family)?;

    // trailing number is the argument of `level 5`, `chime 3`
    let (head, number) = match text.rsplit_once(' ') {
        Some((head, tail)) => match tail.parse::<i64>() {
            Ok(n) => (head.trim_end(), Some(n)),
            Err(_) => (text.as_str(), None),
        },
        None => (text.as_str(), None),
    };
    let head = head.split_whitespace().collect::<Vec<_>>().join(" ");

    let word = table.iter().find(|w| w.text == head)?;
    let arg = match (word.arg, number) {
        (Arg::None, None) => None,
        (Arg::None, Some(_)) => return None,
        (Arg::Fixed(n), None) => Some(n),
        (Arg::Fixed(_), Some(_)) => return None,
        (Arg::Required, None) => return None,
        (Arg::Required | Arg::Optional, n) => n,
    };

    Some(Transition {
        command_number: word.number,
        function: word.function,
        arg,
        group: word.group,
        label: word.label,
    })
}

/// Words accepted for `family`, for select options and logs
pub fn vocabulary(family: &str) -> Vec<&'static str> {
    words(family)
        .map(|table| table.iter().map(|w| w.text).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lighting2_words() {
        let on = transition("lighting2", "on").unwrap();
        assert_eq!((on.command_number, on.function, on.group), (1, "switchOn", false));

        let off = transition("lighting2", "OFF").unwrap();
        assert_eq!((off.command_number, off.function), (0, "switchOff"));

        let level = transition("lighting2", "level 5").unwrap();
        assert_eq!((level.command_number, level.function, level.arg), (2, "setLevel", Some(5)));

        let group_on = transition("lighting2", "group on").unwrap();
        assert_eq!((group_on.command_number, group_on.function, group_on.group), (3, "switchOn", true));

        let group_off = transition("lighting2", "group  off").unwrap();
        assert_eq!((group_off.command_number, group_off.function), (4, "switchOff"));
    }

    #[test]
    fn test_argument_rules() {
        assert!(transition("lighting2", "level").is_none());
        assert!(transition("lighting2", "on 3").is_none());
        assert_eq!(transition("chime1", "chime").unwrap().arg, None);
        assert_eq!(transition("chime1", "chime 4").unwrap().arg, Some(4));
    }

    #[test]
    fn test_moods() {
        let mood = transition("lighting5", "mood3").unwrap();
        assert_eq!((mood.command_number, mood.function, mood.arg), (5, "setMood", Some(3)));
        assert!(transition("lighting5", "mood9").is_none());
    }

    #[test]
    fn test_covers() {
        assert_eq!(transition("rfy", "open").unwrap().function, "up");
        assert_eq!(transition("blinds1", "tilt up").unwrap().function, "tiltUp");
        assert!(transition("temp1", "on").is_none());
        assert!(transition("lighting2", "dance").is_none());
    }

    #[test]
    fn test_vocabulary() {
        assert!(vocabulary("lighting5").contains(&"mood1"));
        assert!(vocabulary("nope").is_empty());
    }
}

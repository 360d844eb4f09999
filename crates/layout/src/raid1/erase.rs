use crate::{Processor, Step};
use lrs::{Erase, Request, RequestBody, Response, ResponseBody};
use model::{Error, Family, LayoutInfo, Result};

/// Issues deletion requests for every extent on erasable media. Tape is
/// append-only: tape-resident extents are left to be orphaned in the
/// catalog instead, which the transfer driver handles.
pub(super) struct Raid1Eraser {
    layout: LayoutInfo,
    outstanding: usize,
    state: State,
}

enum State {
    Init,
    AwaitResponses,
    Done,
}

impl Raid1Eraser {
    pub(super) fn new(layout: LayoutInfo) -> Self {
        Self {
            layout,
            outstanding: 0,
            state: State::Init,
        }
    }
}

impl Processor for Raid1Eraser {
    fn step(&mut self, resp: Option<Response>) -> Result<Step> {
        match (&self.state, resp) {
            (State::Init, None) => {
                let requests: Vec<Request> = self
                    .layout
                    .extents
                    .iter()
                    .filter(|e| e.medium.family != Family::Tape)
                    .map(|e| Request {
                        id: 0,
                        body: RequestBody::Erase(Erase {
                            medium: e.medium.clone(),
                            extent_uuid: e.uuid,
                            address: e.address.clone(),
                            size: e.size,
                        }),
                    })
                    .collect();

                if requests.is_empty() {
                    self.state = State::Done;
                    return Ok(Step::done());
                }
                self.outstanding = requests.len();
                self.state = State::AwaitResponses;
                Ok(Step::requests(requests))
            }
            (State::AwaitResponses, Some(resp)) => match resp.body {
                ResponseBody::Erase => {
                    self.outstanding -= 1;
                    if self.outstanding == 0 {
                        self.state = State::Done;
                        Ok(Step::done())
                    } else {
                        Ok(Step::none())
                    }
                }
                other => Err(Error::Transport(format!(
                    "expected an erase acknowledgment, got {other:?}"
                ))),
            },
            (State::Done, _) => Ok(Step::done()),
            (_, None) => Ok(Step::none()),
            (_, Some(_)) => Err(Error::Transport("eraser stepped out of order".into())),
        }
    }

    fn abort(&mut self) -> Vec<Request> {
        // Erase requests hold no allocation; there is nothing to release.
        self.state = State::Done;
        Vec::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{AttrSet, ExtentInfo, MediumId};
    use uuid::Uuid;

    fn layout(extents: Vec<ExtentInfo>) -> LayoutInfo {
        LayoutInfo {
            object_uuid: Uuid::new_v4(),
            version: 1,
            copy_name: "source".to_string(),
            name: "raid1".to_string(),
            mod_attrs: AttrSet::new(),
            extents,
        }
    }

    fn extent(family: Family, index: u32) -> ExtentInfo {
        let mut e = ExtentInfo::pending(MediumId::new(family, format!("m{index}"), "legacy"), index, 0);
        e.size = 8;
        e.address = format!("addr-{index}");
        e
    }

    #[test]
    fn test_tape_extents_are_skipped() {
        let mut eraser = Raid1Eraser::new(layout(vec![
            extent(Family::Dir, 0),
            extent(Family::Tape, 1),
            extent(Family::Dir, 2),
        ]));

        let step = eraser.step(None).unwrap();
        assert_eq!(step.requests.len(), 2);
        assert!(!step.done);

        for id in 0..2 {
            let resp = Response {
                id,
                body: ResponseBody::Erase,
            };
            let step = eraser.step(Some(resp)).unwrap();
            assert_eq!(step.done, id == 1);
        }
    }

    #[test]
    fn test_all_tape_completes_immediately() {
        let mut eraser = Raid1Eraser::new(layout(vec![extent(Family::Tape, 0)]));
        let step = eraser.step(None).unwrap();
        assert!(step.done);
        assert!(step.requests.is_empty());
    }
}

//! Flatbuffers bindings for the part of the TensorFlow Lite schema (version 3) that
//! this crate writes and reads back. Layout follows `flatc --rust` output so the
//! vtable slots line up with `schema.fbs`.
#![allow(clippy::needless_lifetimes, clippy::too_many_arguments)]

use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, UnionWIPOffset,
    VOffsetT, Vector, Verifiable, Verifier, WIPOffset,
};

pub const FILE_IDENTIFIER: &str = "TFL3";
pub const SCHEMA_VERSION: u32 = 3;

macro_rules! scalar_enum {
    ($name:ident, $repr:ty, { $($variant:ident = $value:expr),* $(,)? }) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
        #[repr(transparent)]
        pub struct $name(pub $repr);

        #[allow(non_upper_case_globals)]
        impl $name {
            $(pub const $variant: Self = Self($value);)*

            pub fn variant_name(self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some(stringify!($variant)),)*
                    _ => None,
                }
            }
        }
    };
}

scalar_enum!(BuiltinOperator, i32, {
    ADD = 0,
    AVERAGE_POOL_2D = 1,
    CONCATENATION = 2,
    CONV_2D = 3,
    DEPTHWISE_CONV_2D = 4,
    DEQUANTIZE = 6,
    FULLY_CONNECTED = 9,
    LOGISTIC = 14,
    MAX_POOL_2D = 17,
    MUL = 18,
    RELU = 19,
    RELU6 = 21,
    RESHAPE = 22,
    SOFTMAX = 25,
    TANH = 28,
    MEAN = 40,
    ELU = 111,
    HARD_SWISH = 117,
});

scalar_enum!(TensorType, i8, {
    FLOAT32 = 0,
    FLOAT16 = 1,
    INT32 = 2,
    UINT8 = 3,
    INT64 = 4,
    INT8 = 9,
});

scalar_enum!(ActivationFunctionType, i8, {
    NONE = 0,
    RELU = 1,
    RELU_N1_TO_1 = 2,
    RELU6 = 3,
    TANH = 4,
});

scalar_enum!(Padding, i8, {
    SAME = 0,
    VALID = 1,
});

scalar_enum!(BuiltinOptions, u8, {
    NONE = 0,
    Conv2DOptions = 1,
    DepthwiseConv2DOptions = 2,
    Pool2DOptions = 5,
    FullyConnectedOptions = 8,
    SoftmaxOptions = 9,
    ConcatenationOptions = 10,
    AddOptions = 11,
    ReshapeOptions = 17,
    MulOptions = 21,
    ReducerOptions = 27,
});

macro_rules! table {
    ($name:ident) => {
        #[derive(Copy, Clone, PartialEq)]
        pub struct $name<'a> {
            pub _tab: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;
            #[inline]
            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                Self {
                    _tab: unsafe { Table::new(buf, loc) },
                }
            }
        }

        impl<'a> $name<'a> {
            /// # Safety
            /// `table` must point at a table of this type.
            #[inline]
            pub unsafe fn init_from_table(table: Table<'a>) -> Self {
                Self { _tab: table }
            }
        }
    };
}

fn finish_table<'bldr, T>(
    fbb: &mut FlatBufferBuilder<'bldr>,
    start: WIPOffset<flatbuffers::TableUnfinishedWIPOffset>,
) -> WIPOffset<T> {
    let o = fbb.end_table(start);
    WIPOffset::new(o.value())
}

// ---------------------------------------------------------------------------
// Model

table!(Model);

impl<'a> Model<'a> {
    pub const VT_VERSION: VOffsetT = 4;
    pub const VT_OPERATOR_CODES: VOffsetT = 6;
    pub const VT_SUBGRAPHS: VOffsetT = 8;
    pub const VT_DESCRIPTION: VOffsetT = 10;
    pub const VT_BUFFERS: VOffsetT = 12;
    pub const VT_METADATA: VOffsetT = 16;
    pub const VT_SIGNATURE_DEFS: VOffsetT = 18;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        args: &ModelArgs<'bldr>,
    ) -> WIPOffset<Model<'bldr>> {
        let start = fbb.start_table();
        if let Some(x) = args.signature_defs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_SIGNATURE_DEFS, x);
        }
        if let Some(x) = args.metadata {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_METADATA, x);
        }
        if let Some(x) = args.buffers {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_BUFFERS, x);
        }
        if let Some(x) = args.description {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_DESCRIPTION, x);
        }
        if let Some(x) = args.subgraphs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_SUBGRAPHS, x);
        }
        if let Some(x) = args.operator_codes {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_OPERATOR_CODES, x);
        }
        fbb.push_slot::<u32>(Self::VT_VERSION, args.version, 0);
        finish_table(fbb, start)
    }

    pub fn version(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_VERSION, Some(0)).unwrap_or(0) }
    }

    pub fn operator_codes(&self) -> Option<Vector<'a, ForwardsUOffset<OperatorCode<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<OperatorCode>>>>(
                    Self::VT_OPERATOR_CODES,
                    None,
                )
        }
    }

    pub fn subgraphs(&self) -> Option<Vector<'a, ForwardsUOffset<SubGraph<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<SubGraph>>>>(
                    Self::VT_SUBGRAPHS,
                    None,
                )
        }
    }

    pub fn description(&self) -> Option<&'a str> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Self::VT_DESCRIPTION, None)
        }
    }

    pub fn buffers(&self) -> Option<Vector<'a, ForwardsUOffset<Buffer<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Buffer>>>>(Self::VT_BUFFERS, None)
        }
    }

    pub fn metadata(&self) -> Option<Vector<'a, ForwardsUOffset<Metadata<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Metadata>>>>(
                    Self::VT_METADATA,
                    None,
                )
        }
    }

    pub fn signature_defs(&self) -> Option<Vector<'a, ForwardsUOffset<SignatureDef<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<SignatureDef>>>>(
                    Self::VT_SIGNATURE_DEFS,
                    None,
                )
        }
    }
}

impl Verifiable for Model<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("version", Self::VT_VERSION, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<OperatorCode>>>>(
                "operator_codes",
                Self::VT_OPERATOR_CODES,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<SubGraph>>>>(
                "subgraphs",
                Self::VT_SUBGRAPHS,
                false,
            )?
            .visit_field::<ForwardsUOffset<&str>>("description", Self::VT_DESCRIPTION, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Buffer>>>>(
                "buffers",
                Self::VT_BUFFERS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Metadata>>>>(
                "metadata",
                Self::VT_METADATA,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<SignatureDef>>>>(
                "signature_defs",
                Self::VT_SIGNATURE_DEFS,
                false,
            )?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct ModelArgs<'a> {
    pub version: u32,
    pub operator_codes: Option<WIPOffset<Vector<'a, ForwardsUOffset<OperatorCode<'a>>>>>,
    pub subgraphs: Option<WIPOffset<Vector<'a, ForwardsUOffset<SubGraph<'a>>>>>,
    pub description: Option<WIPOffset<&'a str>>,
    pub buffers: Option<WIPOffset<Vector<'a, ForwardsUOffset<Buffer<'a>>>>>,
    pub metadata: Option<WIPOffset<Vector<'a, ForwardsUOffset<Metadata<'a>>>>>,
    pub signature_defs: Option<WIPOffset<Vector<'a, ForwardsUOffset<SignatureDef<'a>>>>>,
}

/// Verifies `buf` and returns the root `Model`.
pub fn root_as_model(buf: &[u8]) -> Result<Model<'_>, InvalidFlatbuffer> {
    flatbuffers::root::<Model>(buf)
}

pub fn model_buffer_has_identifier(buf: &[u8]) -> bool {
    flatbuffers::buffer_has_identifier(buf, FILE_IDENTIFIER, false)
}

// ---------------------------------------------------------------------------
// OperatorCode

table!(OperatorCode);

impl<'a> OperatorCode<'a> {
    pub const VT_DEPRECATED_BUILTIN_CODE: VOffsetT = 4;
    pub const VT_CUSTOM_CODE: VOffsetT = 6;
    pub const VT_VERSION: VOffsetT = 8;
    pub const VT_BUILTIN_CODE: VOffsetT = 10;

    /// Writes both the 8-bit legacy field and the 32-bit code, as runtimes read the larger of the two.
    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        builtin_code: BuiltinOperator,
        version: i32,
    ) -> WIPOffset<OperatorCode<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(Self::VT_BUILTIN_CODE, builtin_code.0, 0);
        fbb.push_slot::<i32>(Self::VT_VERSION, version, 1);
        fbb.push_slot::<i8>(
            Self::VT_DEPRECATED_BUILTIN_CODE,
            builtin_code.0.min(127) as i8,
            0,
        );
        finish_table(fbb, start)
    }

    pub fn deprecated_builtin_code(&self) -> i8 {
        unsafe {
            self._tab
                .get::<i8>(Self::VT_DEPRECATED_BUILTIN_CODE, Some(0))
                .unwrap_or(0)
        }
    }

    pub fn custom_code(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_CUSTOM_CODE, None) }
    }

    pub fn version(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_VERSION, Some(1)).unwrap_or(1) }
    }

    pub fn builtin_code(&self) -> BuiltinOperator {
        let code = unsafe { self._tab.get::<i32>(Self::VT_BUILTIN_CODE, Some(0)).unwrap_or(0) };
        BuiltinOperator(code.max(self.deprecated_builtin_code() as i32))
    }
}

impl Verifiable for OperatorCode<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>(
                "deprecated_builtin_code",
                Self::VT_DEPRECATED_BUILTIN_CODE,
                false,
            )?
            .visit_field::<ForwardsUOffset<&str>>("custom_code", Self::VT_CUSTOM_CODE, false)?
            .visit_field::<i32>("version", Self::VT_VERSION, false)?
            .visit_field::<i32>("builtin_code", Self::VT_BUILTIN_CODE, false)?
            .finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SubGraph

table!(SubGraph);

impl<'a> SubGraph<'a> {
    pub const VT_TENSORS: VOffsetT = 4;
    pub const VT_INPUTS: VOffsetT = 6;
    pub const VT_OUTPUTS: VOffsetT = 8;
    pub const VT_OPERATORS: VOffsetT = 10;
    pub const VT_NAME: VOffsetT = 12;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        args: &SubGraphArgs<'bldr>,
    ) -> WIPOffset<SubGraph<'bldr>> {
        let start = fbb.start_table();
        if let Some(x) = args.name {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_NAME, x);
        }
        if let Some(x) = args.operators {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_OPERATORS, x);
        }
        if let Some(x) = args.outputs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_OUTPUTS, x);
        }
        if let Some(x) = args.inputs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_INPUTS, x);
        }
        if let Some(x) = args.tensors {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_TENSORS, x);
        }
        finish_table(fbb, start)
    }

    pub fn tensors(&self) -> Option<Vector<'a, ForwardsUOffset<Tensor<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Tensor>>>>(Self::VT_TENSORS, None)
        }
    }

    pub fn inputs(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_INPUTS, None)
        }
    }

    pub fn outputs(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_OUTPUTS, None)
        }
    }

    pub fn operators(&self) -> Option<Vector<'a, ForwardsUOffset<Operator<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<Operator>>>>(
                    Self::VT_OPERATORS,
                    None,
                )
        }
    }

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }
}

impl Verifiable for SubGraph<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Tensor>>>>(
                "tensors",
                Self::VT_TENSORS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>("inputs", Self::VT_INPUTS, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>("outputs", Self::VT_OUTPUTS, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<Operator>>>>(
                "operators",
                Self::VT_OPERATORS,
                false,
            )?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .finish();
        Ok(())
    }
}

#[derive(Default)]
pub struct SubGraphArgs<'a> {
    pub tensors: Option<WIPOffset<Vector<'a, ForwardsUOffset<Tensor<'a>>>>>,
    pub inputs: Option<WIPOffset<Vector<'a, i32>>>,
    pub outputs: Option<WIPOffset<Vector<'a, i32>>>,
    pub operators: Option<WIPOffset<Vector<'a, ForwardsUOffset<Operator<'a>>>>>,
    pub name: Option<WIPOffset<&'a str>>,
}

// ---------------------------------------------------------------------------
// Tensor

table!(Tensor);

impl<'a> Tensor<'a> {
    pub const VT_SHAPE: VOffsetT = 4;
    pub const VT_TYPE_: VOffsetT = 6;
    pub const VT_BUFFER: VOffsetT = 8;
    pub const VT_NAME: VOffsetT = 10;
    pub const VT_SHAPE_SIGNATURE: VOffsetT = 18;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        args: &TensorArgs<'bldr>,
    ) -> WIPOffset<Tensor<'bldr>> {
        let start = fbb.start_table();
        if let Some(x) = args.shape_signature {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_SHAPE_SIGNATURE, x);
        }
        if let Some(x) = args.name {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_NAME, x);
        }
        fbb.push_slot::<u32>(Self::VT_BUFFER, args.buffer, 0);
        if let Some(x) = args.shape {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_SHAPE, x);
        }
        fbb.push_slot::<i8>(Self::VT_TYPE_, args.type_.0, 0);
        finish_table(fbb, start)
    }

    pub fn shape(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_SHAPE, None)
        }
    }

    pub fn type_(&self) -> TensorType {
        TensorType(unsafe { self._tab.get::<i8>(Self::VT_TYPE_, Some(0)).unwrap_or(0) })
    }

    pub fn buffer(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_BUFFER, Some(0)).unwrap_or(0) }
    }

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    pub fn shape_signature(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_SHAPE_SIGNATURE, None)
        }
    }
}

impl Verifiable for Tensor<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>("shape", Self::VT_SHAPE, false)?
            .visit_field::<i8>("type_", Self::VT_TYPE_, false)?
            .visit_field::<u32>("buffer", Self::VT_BUFFER, false)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>(
                "shape_signature",
                Self::VT_SHAPE_SIGNATURE,
                false,
            )?
            .finish();
        Ok(())
    }
}

pub struct TensorArgs<'a> {
    pub shape: Option<WIPOffset<Vector<'a, i32>>>,
    pub type_: TensorType,
    pub buffer: u32,
    pub name: Option<WIPOffset<&'a str>>,
    pub shape_signature: Option<WIPOffset<Vector<'a, i32>>>,
}

// ---------------------------------------------------------------------------
// Buffer

table!(Buffer);

impl<'a> Buffer<'a> {
    pub const VT_DATA: VOffsetT = 4;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        data: Option<WIPOffset<Vector<'bldr, u8>>>,
    ) -> WIPOffset<Buffer<'bldr>> {
        let start = fbb.start_table();
        if let Some(x) = data {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_DATA, x);
        }
        finish_table(fbb, start)
    }

    pub fn data(&self) -> Option<Vector<'a, u8>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, u8>>>(Self::VT_DATA, None)
        }
    }
}

impl Verifiable for Buffer<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, u8>>>("data", Self::VT_DATA, false)?
            .finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operator

table!(Operator);

impl<'a> Operator<'a> {
    pub const VT_OPCODE_INDEX: VOffsetT = 4;
    pub const VT_INPUTS: VOffsetT = 6;
    pub const VT_OUTPUTS: VOffsetT = 8;
    pub const VT_BUILTIN_OPTIONS_TYPE: VOffsetT = 10;
    pub const VT_BUILTIN_OPTIONS: VOffsetT = 12;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        args: &OperatorArgs<'bldr>,
    ) -> WIPOffset<Operator<'bldr>> {
        let start = fbb.start_table();
        if let Some(x) = args.builtin_options {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_BUILTIN_OPTIONS, x);
        }
        if let Some(x) = args.outputs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_OUTPUTS, x);
        }
        if let Some(x) = args.inputs {
            fbb.push_slot_always::<WIPOffset<_>>(Self::VT_INPUTS, x);
        }
        fbb.push_slot::<u32>(Self::VT_OPCODE_INDEX, args.opcode_index, 0);
        fbb.push_slot::<u8>(
            Self::VT_BUILTIN_OPTIONS_TYPE,
            args.builtin_options_type.0,
            0,
        );
        finish_table(fbb, start)
    }

    pub fn opcode_index(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_OPCODE_INDEX, Some(0)).unwrap_or(0) }
    }

    pub fn inputs(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_INPUTS, None)
        }
    }

    pub fn outputs(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_OUTPUTS, None)
        }
    }

    pub fn builtin_options_type(&self) -> BuiltinOptions {
        BuiltinOptions(unsafe {
            self._tab
                .get::<u8>(Self::VT_BUILTIN_OPTIONS_TYPE, Some(0))
                .unwrap_or(0)
        })
    }

    fn builtin_options_table(&self, expected: BuiltinOptions) -> Option<Table<'a>> {
        if self.builtin_options_type() != expected {
            return None;
        }
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Table<'a>>>(Self::VT_BUILTIN_OPTIONS, None)
        }
    }

    pub fn builtin_options_as_conv_2_doptions(&self) -> Option<Conv2DOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::Conv2DOptions)
            .map(|t| unsafe { Conv2DOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_depthwise_conv_2_doptions(
        &self,
    ) -> Option<DepthwiseConv2DOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::DepthwiseConv2DOptions)
            .map(|t| unsafe { DepthwiseConv2DOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_pool_2_doptions(&self) -> Option<Pool2DOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::Pool2DOptions)
            .map(|t| unsafe { Pool2DOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_fully_connected_options(
        &self,
    ) -> Option<FullyConnectedOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::FullyConnectedOptions)
            .map(|t| unsafe { FullyConnectedOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_softmax_options(&self) -> Option<SoftmaxOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::SoftmaxOptions)
            .map(|t| unsafe { SoftmaxOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_concatenation_options(&self) -> Option<ConcatenationOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::ConcatenationOptions)
            .map(|t| unsafe { ConcatenationOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_add_options(&self) -> Option<ActivationOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::AddOptions)
            .map(|t| unsafe { ActivationOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_mul_options(&self) -> Option<ActivationOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::MulOptions)
            .map(|t| unsafe { ActivationOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_reshape_options(&self) -> Option<ReshapeOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::ReshapeOptions)
            .map(|t| unsafe { ReshapeOptions::init_from_table(t) })
    }

    pub fn builtin_options_as_reducer_options(&self) -> Option<ReducerOptions<'a>> {
        self.builtin_options_table(BuiltinOptions::ReducerOptions)
            .map(|t| unsafe { ReducerOptions::init_from_table(t) })
    }
}

impl Verifiable for Operator<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<u32>("opcode_index", Self::VT_OPCODE_INDEX, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>("inputs", Self::VT_INPUTS, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>("outputs", Self::VT_OUTPUTS, false)?
            .visit_union::<u8, _>(
                "builtin_options_type",
                Self::VT_BUILTIN_OPTIONS_TYPE,
                "builtin_options",
                Self::VT_BUILTIN_OPTIONS,
                false,
                |key, v, pos| match BuiltinOptions(key) {
                    BuiltinOptions::Conv2DOptions => v
                        .verify_union_variant::<ForwardsUOffset<Conv2DOptions>>(
                            "BuiltinOptions::Conv2DOptions",
                            pos,
                        ),
                    BuiltinOptions::DepthwiseConv2DOptions => v
                        .verify_union_variant::<ForwardsUOffset<DepthwiseConv2DOptions>>(
                            "BuiltinOptions::DepthwiseConv2DOptions",
                            pos,
                        ),
                    BuiltinOptions::Pool2DOptions => v
                        .verify_union_variant::<ForwardsUOffset<Pool2DOptions>>(
                            "BuiltinOptions::Pool2DOptions",
                            pos,
                        ),
                    BuiltinOptions::FullyConnectedOptions => v
                        .verify_union_variant::<ForwardsUOffset<FullyConnectedOptions>>(
                            "BuiltinOptions::FullyConnectedOptions",
                            pos,
                        ),
                    BuiltinOptions::SoftmaxOptions => v
                        .verify_union_variant::<ForwardsUOffset<SoftmaxOptions>>(
                            "BuiltinOptions::SoftmaxOptions",
                            pos,
                        ),
                    BuiltinOptions::ConcatenationOptions => v
                        .verify_union_variant::<ForwardsUOffset<ConcatenationOptions>>(
                            "BuiltinOptions::ConcatenationOptions",
                            pos,
                        ),
                    BuiltinOptions::AddOptions | BuiltinOptions::MulOptions => v
                        .verify_union_variant::<ForwardsUOffset<ActivationOptions>>(
                            "BuiltinOptions::ActivationOptions",
                            pos,
                        ),
                    BuiltinOptions::ReshapeOptions => v
                        .verify_union_variant::<ForwardsUOffset<ReshapeOptions>>(
                            "BuiltinOptions::ReshapeOptions",
                            pos,
                        ),
                    BuiltinOptions::ReducerOptions => v
                        .verify_union_variant::<ForwardsUOffset<ReducerOptions>>(
                            "BuiltinOptions::ReducerOptions",
                            pos,
                        ),
                    _ => Ok(()),
                },
            )?
            .finish();
        Ok(())
    }
}

pub struct OperatorArgs<'a> {
    pub opcode_index: u32,
    pub inputs: Option<WIPOffset<Vector<'a, i32>>>,
    pub outputs: Option<WIPOffset<Vector<'a, i32>>>,
    pub builtin_options_type: BuiltinOptions,
    pub builtin_options: Option<WIPOffset<UnionWIPOffset>>,
}

// ---------------------------------------------------------------------------
// Metadata, SignatureDef, TensorMap

table!(Metadata);

impl<'a> Metadata<'a> {
    pub const VT_NAME: VOffsetT = 4;
    pub const VT_BUFFER: VOffsetT = 6;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        name: WIPOffset<&'bldr str>,
        buffer: u32,
    ) -> WIPOffset<Metadata<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<u32>(Self::VT_BUFFER, buffer, 0);
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_NAME, name);
        finish_table(fbb, start)
    }

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    pub fn buffer(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_BUFFER, Some(0)).unwrap_or(0) }
    }
}

impl Verifiable for Metadata<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<u32>("buffer", Self::VT_BUFFER, false)?
            .finish();
        Ok(())
    }
}

table!(TensorMap);

impl<'a> TensorMap<'a> {
    pub const VT_NAME: VOffsetT = 4;
    pub const VT_TENSOR_INDEX: VOffsetT = 6;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        name: WIPOffset<&'bldr str>,
        tensor_index: u32,
    ) -> WIPOffset<TensorMap<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<u32>(Self::VT_TENSOR_INDEX, tensor_index, 0);
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_NAME, name);
        finish_table(fbb, start)
    }

    pub fn name(&self) -> Option<&'a str> {
        unsafe { self._tab.get::<ForwardsUOffset<&str>>(Self::VT_NAME, None) }
    }

    pub fn tensor_index(&self) -> u32 {
        unsafe { self._tab.get::<u32>(Self::VT_TENSOR_INDEX, Some(0)).unwrap_or(0) }
    }
}

impl Verifiable for TensorMap<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("name", Self::VT_NAME, false)?
            .visit_field::<u32>("tensor_index", Self::VT_TENSOR_INDEX, false)?
            .finish();
        Ok(())
    }
}

table!(SignatureDef);

impl<'a> SignatureDef<'a> {
    pub const VT_INPUTS: VOffsetT = 4;
    pub const VT_OUTPUTS: VOffsetT = 6;
    pub const VT_SIGNATURE_KEY: VOffsetT = 8;
    pub const VT_SUBGRAPH_INDEX: VOffsetT = 12;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        inputs: WIPOffset<Vector<'bldr, ForwardsUOffset<TensorMap<'bldr>>>>,
        outputs: WIPOffset<Vector<'bldr, ForwardsUOffset<TensorMap<'bldr>>>>,
        signature_key: WIPOffset<&'bldr str>,
        subgraph_index: u32,
    ) -> WIPOffset<SignatureDef<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<u32>(Self::VT_SUBGRAPH_INDEX, subgraph_index, 0);
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_SIGNATURE_KEY, signature_key);
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_OUTPUTS, outputs);
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_INPUTS, inputs);
        finish_table(fbb, start)
    }

    pub fn inputs(&self) -> Option<Vector<'a, ForwardsUOffset<TensorMap<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<TensorMap>>>>(
                    Self::VT_INPUTS,
                    None,
                )
        }
    }

    pub fn outputs(&self) -> Option<Vector<'a, ForwardsUOffset<TensorMap<'a>>>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<TensorMap>>>>(
                    Self::VT_OUTPUTS,
                    None,
                )
        }
    }

    pub fn signature_key(&self) -> Option<&'a str> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Self::VT_SIGNATURE_KEY, None)
        }
    }

    pub fn subgraph_index(&self) -> u32 {
        unsafe {
            self._tab
                .get::<u32>(Self::VT_SUBGRAPH_INDEX, Some(0))
                .unwrap_or(0)
        }
    }
}

impl Verifiable for SignatureDef<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<TensorMap>>>>(
                "inputs",
                Self::VT_INPUTS,
                false,
            )?
            .visit_field::<ForwardsUOffset<Vector<'_, ForwardsUOffset<TensorMap>>>>(
                "outputs",
                Self::VT_OUTPUTS,
                false,
            )?
            .visit_field::<ForwardsUOffset<&str>>(
                "signature_key",
                Self::VT_SIGNATURE_KEY,
                false,
            )?
            .visit_field::<u32>("subgraph_index", Self::VT_SUBGRAPH_INDEX, false)?
            .finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builtin option tables

table!(Conv2DOptions);

impl<'a> Conv2DOptions<'a> {
    pub const VT_PADDING: VOffsetT = 4;
    pub const VT_STRIDE_W: VOffsetT = 6;
    pub const VT_STRIDE_H: VOffsetT = 8;
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 10;
    pub const VT_DILATION_W_FACTOR: VOffsetT = 12;
    pub const VT_DILATION_H_FACTOR: VOffsetT = 14;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        padding: Padding,
        stride_w: i32,
        stride_h: i32,
        fused_activation_function: ActivationFunctionType,
        dilation_w_factor: i32,
        dilation_h_factor: i32,
    ) -> WIPOffset<Conv2DOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(Self::VT_DILATION_H_FACTOR, dilation_h_factor, 1);
        fbb.push_slot::<i32>(Self::VT_DILATION_W_FACTOR, dilation_w_factor, 1);
        fbb.push_slot::<i32>(Self::VT_STRIDE_H, stride_h, 0);
        fbb.push_slot::<i32>(Self::VT_STRIDE_W, stride_w, 0);
        fbb.push_slot::<i8>(
            Self::VT_FUSED_ACTIVATION_FUNCTION,
            fused_activation_function.0,
            0,
        );
        fbb.push_slot::<i8>(Self::VT_PADDING, padding.0, 0);
        finish_table(fbb, start)
    }

    pub fn padding(&self) -> Padding {
        Padding(unsafe { self._tab.get::<i8>(Self::VT_PADDING, Some(0)).unwrap_or(0) })
    }
    pub fn stride_w(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_W, Some(0)).unwrap_or(0) }
    }
    pub fn stride_h(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_H, Some(0)).unwrap_or(0) }
    }
    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }
    pub fn dilation_w_factor(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_DILATION_W_FACTOR, Some(1)).unwrap_or(1) }
    }
    pub fn dilation_h_factor(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_DILATION_H_FACTOR, Some(1)).unwrap_or(1) }
    }
}

impl Verifiable for Conv2DOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>("padding", Self::VT_PADDING, false)?
            .visit_field::<i32>("stride_w", Self::VT_STRIDE_W, false)?
            .visit_field::<i32>("stride_h", Self::VT_STRIDE_H, false)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .visit_field::<i32>("dilation_w_factor", Self::VT_DILATION_W_FACTOR, false)?
            .visit_field::<i32>("dilation_h_factor", Self::VT_DILATION_H_FACTOR, false)?
            .finish();
        Ok(())
    }
}

table!(DepthwiseConv2DOptions);

impl<'a> DepthwiseConv2DOptions<'a> {
    pub const VT_PADDING: VOffsetT = 4;
    pub const VT_STRIDE_W: VOffsetT = 6;
    pub const VT_STRIDE_H: VOffsetT = 8;
    pub const VT_DEPTH_MULTIPLIER: VOffsetT = 10;
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 12;
    pub const VT_DILATION_W_FACTOR: VOffsetT = 14;
    pub const VT_DILATION_H_FACTOR: VOffsetT = 16;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        padding: Padding,
        stride_w: i32,
        stride_h: i32,
        depth_multiplier: i32,
        fused_activation_function: ActivationFunctionType,
        dilation_w_factor: i32,
        dilation_h_factor: i32,
    ) -> WIPOffset<DepthwiseConv2DOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(Self::VT_DILATION_H_FACTOR, dilation_h_factor, 1);
        fbb.push_slot::<i32>(Self::VT_DILATION_W_FACTOR, dilation_w_factor, 1);
        fbb.push_slot::<i32>(Self::VT_DEPTH_MULTIPLIER, depth_multiplier, 0);
        fbb.push_slot::<i32>(Self::VT_STRIDE_H, stride_h, 0);
        fbb.push_slot::<i32>(Self::VT_STRIDE_W, stride_w, 0);
        fbb.push_slot::<i8>(
            Self::VT_FUSED_ACTIVATION_FUNCTION,
            fused_activation_function.0,
            0,
        );
        fbb.push_slot::<i8>(Self::VT_PADDING, padding.0, 0);
        finish_table(fbb, start)
    }

    pub fn padding(&self) -> Padding {
        Padding(unsafe { self._tab.get::<i8>(Self::VT_PADDING, Some(0)).unwrap_or(0) })
    }
    pub fn stride_w(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_W, Some(0)).unwrap_or(0) }
    }
    pub fn stride_h(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_H, Some(0)).unwrap_or(0) }
    }
    pub fn depth_multiplier(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_DEPTH_MULTIPLIER, Some(0)).unwrap_or(0) }
    }
    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }
    pub fn dilation_w_factor(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_DILATION_W_FACTOR, Some(1)).unwrap_or(1) }
    }
    pub fn dilation_h_factor(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_DILATION_H_FACTOR, Some(1)).unwrap_or(1) }
    }
}

impl Verifiable for DepthwiseConv2DOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>("padding", Self::VT_PADDING, false)?
            .visit_field::<i32>("stride_w", Self::VT_STRIDE_W, false)?
            .visit_field::<i32>("stride_h", Self::VT_STRIDE_H, false)?
            .visit_field::<i32>("depth_multiplier", Self::VT_DEPTH_MULTIPLIER, false)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .visit_field::<i32>("dilation_w_factor", Self::VT_DILATION_W_FACTOR, false)?
            .visit_field::<i32>("dilation_h_factor", Self::VT_DILATION_H_FACTOR, false)?
            .finish();
        Ok(())
    }
}

table!(Pool2DOptions);

impl<'a> Pool2DOptions<'a> {
    pub const VT_PADDING: VOffsetT = 4;
    pub const VT_STRIDE_W: VOffsetT = 6;
    pub const VT_STRIDE_H: VOffsetT = 8;
    pub const VT_FILTER_WIDTH: VOffsetT = 10;
    pub const VT_FILTER_HEIGHT: VOffsetT = 12;
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 14;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        padding: Padding,
        stride_w: i32,
        stride_h: i32,
        filter_width: i32,
        filter_height: i32,
    ) -> WIPOffset<Pool2DOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(Self::VT_FILTER_HEIGHT, filter_height, 0);
        fbb.push_slot::<i32>(Self::VT_FILTER_WIDTH, filter_width, 0);
        fbb.push_slot::<i32>(Self::VT_STRIDE_H, stride_h, 0);
        fbb.push_slot::<i32>(Self::VT_STRIDE_W, stride_w, 0);
        fbb.push_slot::<i8>(Self::VT_PADDING, padding.0, 0);
        finish_table(fbb, start)
    }

    pub fn padding(&self) -> Padding {
        Padding(unsafe { self._tab.get::<i8>(Self::VT_PADDING, Some(0)).unwrap_or(0) })
    }
    pub fn stride_w(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_W, Some(0)).unwrap_or(0) }
    }
    pub fn stride_h(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_STRIDE_H, Some(0)).unwrap_or(0) }
    }
    pub fn filter_width(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_FILTER_WIDTH, Some(0)).unwrap_or(0) }
    }
    pub fn filter_height(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_FILTER_HEIGHT, Some(0)).unwrap_or(0) }
    }
    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }
}

impl Verifiable for Pool2DOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>("padding", Self::VT_PADDING, false)?
            .visit_field::<i32>("stride_w", Self::VT_STRIDE_W, false)?
            .visit_field::<i32>("stride_h", Self::VT_STRIDE_H, false)?
            .visit_field::<i32>("filter_width", Self::VT_FILTER_WIDTH, false)?
            .visit_field::<i32>("filter_height", Self::VT_FILTER_HEIGHT, false)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .finish();
        Ok(())
    }
}

table!(FullyConnectedOptions);

impl<'a> FullyConnectedOptions<'a> {
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 4;
    pub const VT_KEEP_NUM_DIMS: VOffsetT = 8;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        fused_activation_function: ActivationFunctionType,
    ) -> WIPOffset<FullyConnectedOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i8>(
            Self::VT_FUSED_ACTIVATION_FUNCTION,
            fused_activation_function.0,
            0,
        );
        finish_table(fbb, start)
    }

    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }

    pub fn keep_num_dims(&self) -> bool {
        unsafe {
            self._tab
                .get::<bool>(Self::VT_KEEP_NUM_DIMS, Some(false))
                .unwrap_or(false)
        }
    }
}

impl Verifiable for FullyConnectedOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .visit_field::<bool>("keep_num_dims", Self::VT_KEEP_NUM_DIMS, false)?
            .finish();
        Ok(())
    }
}

table!(SoftmaxOptions);

impl<'a> SoftmaxOptions<'a> {
    pub const VT_BETA: VOffsetT = 4;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        beta: f32,
    ) -> WIPOffset<SoftmaxOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<f32>(Self::VT_BETA, beta, 0.0);
        finish_table(fbb, start)
    }

    pub fn beta(&self) -> f32 {
        unsafe { self._tab.get::<f32>(Self::VT_BETA, Some(0.0)).unwrap_or(0.0) }
    }
}

impl Verifiable for SoftmaxOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f32>("beta", Self::VT_BETA, false)?
            .finish();
        Ok(())
    }
}

table!(ConcatenationOptions);

impl<'a> ConcatenationOptions<'a> {
    pub const VT_AXIS: VOffsetT = 4;
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 6;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        axis: i32,
    ) -> WIPOffset<ConcatenationOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i32>(Self::VT_AXIS, axis, 0);
        finish_table(fbb, start)
    }

    pub fn axis(&self) -> i32 {
        unsafe { self._tab.get::<i32>(Self::VT_AXIS, Some(0)).unwrap_or(0) }
    }

    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }
}

impl Verifiable for ConcatenationOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i32>("axis", Self::VT_AXIS, false)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .finish();
        Ok(())
    }
}

// AddOptions and MulOptions both lead with the fused activation in slot 0.
table!(ActivationOptions);

impl<'a> ActivationOptions<'a> {
    pub const VT_FUSED_ACTIVATION_FUNCTION: VOffsetT = 4;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        fused_activation_function: ActivationFunctionType,
    ) -> WIPOffset<ActivationOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<i8>(
            Self::VT_FUSED_ACTIVATION_FUNCTION,
            fused_activation_function.0,
            0,
        );
        finish_table(fbb, start)
    }

    pub fn fused_activation_function(&self) -> ActivationFunctionType {
        ActivationFunctionType(unsafe {
            self._tab
                .get::<i8>(Self::VT_FUSED_ACTIVATION_FUNCTION, Some(0))
                .unwrap_or(0)
        })
    }
}

impl Verifiable for ActivationOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i8>(
                "fused_activation_function",
                Self::VT_FUSED_ACTIVATION_FUNCTION,
                false,
            )?
            .finish();
        Ok(())
    }
}

table!(ReshapeOptions);

impl<'a> ReshapeOptions<'a> {
    pub const VT_NEW_SHAPE: VOffsetT = 4;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        new_shape: WIPOffset<Vector<'bldr, i32>>,
    ) -> WIPOffset<ReshapeOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot_always::<WIPOffset<_>>(Self::VT_NEW_SHAPE, new_shape);
        finish_table(fbb, start)
    }

    pub fn new_shape(&self) -> Option<Vector<'a, i32>> {
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, i32>>>(Self::VT_NEW_SHAPE, None)
        }
    }
}

impl Verifiable for ReshapeOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, i32>>>(
                "new_shape",
                Self::VT_NEW_SHAPE,
                false,
            )?
            .finish();
        Ok(())
    }
}

table!(ReducerOptions);

impl<'a> ReducerOptions<'a> {
    pub const VT_KEEP_DIMS: VOffsetT = 4;

    pub fn create<'bldr>(
        fbb: &mut FlatBufferBuilder<'bldr>,
        keep_dims: bool,
    ) -> WIPOffset<ReducerOptions<'bldr>> {
        let start = fbb.start_table();
        fbb.push_slot::<bool>(Self::VT_KEEP_DIMS, keep_dims, false);
        finish_table(fbb, start)
    }

    pub fn keep_dims(&self) -> bool {
        unsafe {
            self._tab
                .get::<bool>(Self::VT_KEEP_DIMS, Some(false))
                .unwrap_or(false)
        }
    }
}

impl Verifiable for ReducerOptions<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<bool>("keep_dims", Self::VT_KEEP_DIMS, false)?
            .finish();
        Ok(())
    }
}
